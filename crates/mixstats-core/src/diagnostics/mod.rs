// =============================================================================
// Model Diagnostics
// =============================================================================
//
// Goodness-of-fit quantities for fitted regressions and mixtures:
//
// - LOG-LIKELIHOOD: per canonical family, plus multinomial
// - DEVIANCE:       2 × (saturated log-likelihood − model log-likelihood)
// - RESIDUALS:      response and Pearson residuals
// - MODEL FIT:      AIC and BIC, including the parameter count of a mixture
//
// All functions accept optional prior weights; `None` means every
// observation has weight 1.
//
// =============================================================================

use std::f64::consts::PI;

use ndarray::{Array1, Array2};
use statrs::function::gamma::ln_gamma;

use crate::links::CanonicalFamily;

/// Probabilities are clamped to [EPS, 1 − EPS] inside logarithms.
const PROB_EPS: f64 = 1e-15;

#[inline]
fn w_at(weights: Option<&Array1<f64>>, i: usize) -> f64 {
    weights.map_or(1.0, |w| w[i])
}

/// y ln(y/μ) with the 0·ln 0 = 0 convention.
#[inline]
fn y_log_y_over(y: f64, mu: f64) -> f64 {
    if y == 0.0 {
        0.0
    } else {
        y * (y / mu).ln()
    }
}

// =============================================================================
// Log-likelihood
// =============================================================================

/// Σ w [y ln μ + (1−y) ln(1−μ)]
pub fn log_likelihood_binomial(y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    y.iter()
        .zip(mu.iter())
        .enumerate()
        .map(|(i, (&yi, &mi))| {
            let m = mi.clamp(PROB_EPS, 1.0 - PROB_EPS);
            w_at(weights, i) * (yi * m.ln() + (1.0 - yi) * (1.0 - m).ln())
        })
        .sum()
}

/// Σ w [y ln μ − μ − ln Γ(y+1)]
pub fn log_likelihood_poisson(y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    y.iter()
        .zip(mu.iter())
        .enumerate()
        .map(|(i, (&yi, &mi))| {
            let term = if yi == 0.0 { -mi } else { yi * mi.ln() - mi };
            w_at(weights, i) * (term - ln_gamma(yi + 1.0))
        })
        .sum()
}

/// Gaussian log-likelihood with variance `scale`.
pub fn log_likelihood_gaussian(
    y: &Array1<f64>,
    mu: &Array1<f64>,
    scale: f64,
    weights: Option<&Array1<f64>>,
) -> f64 {
    y.iter()
        .zip(mu.iter())
        .enumerate()
        .map(|(i, (&yi, &mi))| {
            let r = yi - mi;
            -0.5 * w_at(weights, i) * ((2.0 * PI * scale).ln() + r * r / scale)
        })
        .sum()
}

/// Log-likelihood under the family implied by a canonical link.
///
/// For the Gaussian family the variance is its ML estimate, the weighted
/// mean squared residual.
pub fn log_likelihood(
    family: CanonicalFamily,
    y: &Array1<f64>,
    mu: &Array1<f64>,
    weights: Option<&Array1<f64>>,
) -> f64 {
    match family {
        CanonicalFamily::Binomial => log_likelihood_binomial(y, mu, weights),
        CanonicalFamily::Poisson => log_likelihood_poisson(y, mu, weights),
        CanonicalFamily::Gaussian => {
            let total: f64 = (0..y.len()).map(|i| w_at(weights, i)).sum();
            let scale = deviance_gaussian(y, mu, weights) / total;
            log_likelihood_gaussian(y, mu, scale.max(f64::MIN_POSITIVE), weights)
        }
    }
}

/// Σ w ln p_{i, class_i} for an N×M matrix of class probabilities.
pub fn log_likelihood_multinomial(
    probabilities: &Array2<f64>,
    classes: &[usize],
    weights: Option<&Array1<f64>>,
) -> f64 {
    classes
        .iter()
        .enumerate()
        .map(|(i, &c)| w_at(weights, i) * probabilities[[i, c]].max(PROB_EPS).ln())
        .sum()
}

// =============================================================================
// Deviance
// =============================================================================

pub fn deviance_binomial(y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    2.0 * y
        .iter()
        .zip(mu.iter())
        .enumerate()
        .map(|(i, (&yi, &mi))| {
            let m = mi.clamp(PROB_EPS, 1.0 - PROB_EPS);
            w_at(weights, i) * (y_log_y_over(yi, m) + y_log_y_over(1.0 - yi, 1.0 - m))
        })
        .sum::<f64>()
}

pub fn deviance_poisson(y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    2.0 * y
        .iter()
        .zip(mu.iter())
        .enumerate()
        .map(|(i, (&yi, &mi))| w_at(weights, i) * (y_log_y_over(yi, mi) - (yi - mi)))
        .sum::<f64>()
}

pub fn deviance_gaussian(y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    y.iter()
        .zip(mu.iter())
        .enumerate()
        .map(|(i, (&yi, &mi))| w_at(weights, i) * (yi - mi).powi(2))
        .sum()
}

pub fn deviance(
    family: CanonicalFamily,
    y: &Array1<f64>,
    mu: &Array1<f64>,
    weights: Option<&Array1<f64>>,
) -> f64 {
    match family {
        CanonicalFamily::Binomial => deviance_binomial(y, mu, weights),
        CanonicalFamily::Poisson => deviance_poisson(y, mu, weights),
        CanonicalFamily::Gaussian => deviance_gaussian(y, mu, weights),
    }
}

/// Deviance of the intercept-only model (μ = weighted mean of y).
pub fn null_deviance(family: CanonicalFamily, y: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    let total: f64 = (0..y.len()).map(|i| w_at(weights, i)).sum();
    let mean = y.iter().enumerate().map(|(i, &yi)| w_at(weights, i) * yi).sum::<f64>() / total;
    let mu = Array1::from_elem(y.len(), mean);
    deviance(family, y, &mu, weights)
}

// =============================================================================
// Residuals
// =============================================================================

/// y − μ
pub fn resid_response(y: &Array1<f64>, mu: &Array1<f64>) -> Array1<f64> {
    y - mu
}

/// (y − μ) / sqrt(V(μ)), using the family's variance function.
pub fn resid_pearson(family: CanonicalFamily, y: &Array1<f64>, mu: &Array1<f64>) -> Array1<f64> {
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let v = match family {
                CanonicalFamily::Binomial => mi * (1.0 - mi),
                CanonicalFamily::Poisson => mi,
                CanonicalFamily::Gaussian => 1.0,
            };
            (yi - mi) / v.sqrt()
        })
        .collect()
}

// =============================================================================
// Information criteria
// =============================================================================

/// AIC = −2ℓ + 2k
pub fn aic(log_likelihood: f64, n_params: usize) -> f64 {
    -2.0 * log_likelihood + 2.0 * n_params as f64
}

/// BIC = −2ℓ + k ln n
pub fn bic(log_likelihood: f64, n_params: usize, n_obs: usize) -> f64 {
    -2.0 * log_likelihood + n_params as f64 * (n_obs as f64).ln()
}

/// Free parameters of a K-component mixture: K per-component parameter
/// sets plus K − 1 independent mixing coefficients.
pub fn mixture_parameter_count(n_components: usize, params_per_component: usize) -> usize {
    n_components * params_per_component + n_components.saturating_sub(1)
}
