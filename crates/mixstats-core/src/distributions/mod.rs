// =============================================================================
// Component Distributions
// =============================================================================
//
// This module defines what a distribution must provide to take part in a
// mixture (or in any other weighted maximum-likelihood procedure), and ships
// the concrete components used throughout the crate.
//
// THE COMPONENT CONTRACT
// ----------------------
// The EM engine needs exactly four things from a component:
//
//   1. log p(x)                     -> `Component::log_density`
//   2. a weighted re-fit            -> `Component::fit_weighted`
//   3. cloning                      -> `Clone`
//   4. (optionally) random draws    -> `Component::as_sampler`
//
// Sampling is a capability, not a requirement. A component advertises it by
// returning `Some(self)` from `as_sampler` and callers check for it before sampling.
//
// WEIGHTED FITTING
// ----------------
// Weights are relative importances and need not sum to one. Passing `None`
// is exactly the same as passing a weight of 1 for every observation:
//
//     fit(x)  ==  fit_weighted(x, Some(&[1.0; n]), &default_options)
//
// Moments and CDFs live on the `UnivariateComponent` and
// `MultivariateComponent` extension traits because mixtures need them to
// compute their own moments.
//
// =============================================================================

mod exponential;
mod independent;
mod multivariate_normal;
mod normal;
mod poisson;

pub use exponential::Exponential;
pub use independent::Independent;
pub use multivariate_normal::{MultivariateNormal, MultivariateNormalOptions};
pub use normal::{Normal, NormalOptions};
pub use poisson::Poisson;

use ndarray::{Array1, Array2};
use rand::RngCore;

use crate::error::{check_weights, MixStatsError, Result};

/// A distribution over observations of type `X` that can be re-estimated
/// from weighted data.
pub trait Component<X>: Clone + Send + Sync {
    /// Options understood by `fit_weighted` (regularisation and the like).
    type Options: Clone + Default + Send + Sync;

    /// Log density (continuous) or log mass (discrete) at `x`.
    fn log_density(&self, x: &X) -> f64;

    /// Density or mass at `x`.
    fn density(&self, x: &X) -> f64 {
        self.log_density(x).exp()
    }

    /// Re-estimate the parameters in place by weighted maximum likelihood.
    ///
    /// On error the component keeps its previous parameters.
    fn fit_weighted(
        &mut self,
        observations: &[X],
        weights: Option<&[f64]>,
        options: &Self::Options,
    ) -> Result<()>;

    /// Unweighted fit with default options.
    fn fit(&mut self, observations: &[X]) -> Result<()> {
        self.fit_weighted(observations, None, &Self::Options::default())
    }

    /// The sampling capability, if this component has one.
    fn as_sampler(&self) -> Option<&dyn Sampler<X>> {
        None
    }
}

/// Random draws from a distribution, using a caller-supplied generator.
pub trait Sampler<X> {
    fn sample(&self, rng: &mut dyn RngCore) -> X;
}

/// Scalar components with a CDF and closed-form moments.
pub trait UnivariateComponent: Component<f64> {
    fn cdf(&self, x: f64) -> f64;
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;
}

/// Vector-valued components with closed-form moments.
pub trait MultivariateComponent: Component<Array1<f64>> {
    fn dimension(&self) -> usize;
    fn mean(&self) -> Array1<f64>;
    fn covariance(&self) -> Array2<f64>;
}

// =============================================================================
// Shared helpers for weighted estimation
// =============================================================================

/// Validate observations and weights for a fit and return the total weight.
///
/// Fails on empty input, bad weights, or a zero total weight (a component
/// with no responsibility mass cannot be estimated).
pub(crate) fn prepare_fit<X>(observations: &[X], weights: Option<&[f64]>) -> Result<f64> {
    if observations.is_empty() {
        return Err(MixStatsError::EmptyInput("no observations to fit".to_string()));
    }
    let total = check_weights(weights, observations.len())?;
    if total <= 0.0 {
        return Err(MixStatsError::NumericalDegeneracy(
            "total observation weight is zero".to_string(),
        ));
    }
    Ok(total)
}

#[inline]
pub(crate) fn weight_at(weights: Option<&[f64]>, i: usize) -> f64 {
    weights.map_or(1.0, |w| w[i])
}

/// Weighted mean of scalar observations. `total` is the sum of weights.
pub(crate) fn weighted_mean(observations: &[f64], weights: Option<&[f64]>, total: f64) -> f64 {
    observations
        .iter()
        .enumerate()
        .map(|(i, &x)| weight_at(weights, i) * x)
        .sum::<f64>()
        / total
}

/// Weighted maximum-likelihood variance about `mean`.
pub(crate) fn weighted_variance(
    observations: &[f64],
    weights: Option<&[f64]>,
    mean: f64,
    total: f64,
) -> f64 {
    observations
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let d = x - mean;
            weight_at(weights, i) * d * d
        })
        .sum::<f64>()
        / total
}
