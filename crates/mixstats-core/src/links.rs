// =============================================================================
// Link Functions
// =============================================================================
//
// A link function g connects the mean of the response to the linear
// predictor:
//
//     η = g(μ)        μ = g⁻¹(η)
//
// Only canonical links are provided, so each one implies its response
// family:
//
//     Link       g(μ)            family     valid outputs
//     --------   -------------   --------   -------------
//     Logit      ln(μ/(1−μ))     binomial   0 ≤ y ≤ 1
//     Log        ln(μ)           Poisson    y ≥ 0
//     Identity   μ               Gaussian   any finite y
//
// IRLS WEIGHTS
// ------------
// For a canonical link the Newton curvature of the negative log-likelihood
// with respect to η is dμ/dη = 1/g'(μ), which equals the variance function:
//
//     Logit:    μ(1−μ)
//     Log:      μ
//     Identity: 1
//
// That is what `weight` returns.
//
// =============================================================================

use ndarray::Array1;

/// Response family implied by a canonical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalFamily {
    Binomial,
    Poisson,
    Gaussian,
}

/// A link function with its inverse, derivative and IRLS weight.
pub trait Link: Send + Sync {
    fn name(&self) -> &str;

    /// η = g(μ)
    fn link(&self, mu: &Array1<f64>) -> Array1<f64>;

    /// μ = g⁻¹(η)
    fn inverse(&self, eta: &Array1<f64>) -> Array1<f64>;

    /// g'(μ)
    fn derivative(&self, mu: &Array1<f64>) -> Array1<f64>;

    /// dμ/dη evaluated at μ, the per-observation IRLS weight.
    fn weight(&self, mu: &Array1<f64>) -> Array1<f64>;

    /// Whether `y` is a valid observed response for this link's family.
    fn is_valid_output(&self, y: f64) -> bool;

    fn family(&self) -> CanonicalFamily;
}

// =============================================================================
// Logit
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LogitLink;

/// Logistic sigmoid without overflow for large |η|.
pub fn sigmoid(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

impl Link for LogitLink {
    fn name(&self) -> &str {
        "logit"
    }

    fn link(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| (m / (1.0 - m)).ln())
    }

    fn inverse(&self, eta: &Array1<f64>) -> Array1<f64> {
        eta.mapv(sigmoid)
    }

    fn derivative(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| 1.0 / (m * (1.0 - m)))
    }

    fn weight(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| m * (1.0 - m))
    }

    fn is_valid_output(&self, y: f64) -> bool {
        (0.0..=1.0).contains(&y)
    }

    fn family(&self) -> CanonicalFamily {
        CanonicalFamily::Binomial
    }
}

// =============================================================================
// Log
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LogLink;

impl Link for LogLink {
    fn name(&self) -> &str {
        "log"
    }

    fn link(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(f64::ln)
    }

    fn inverse(&self, eta: &Array1<f64>) -> Array1<f64> {
        eta.mapv(f64::exp)
    }

    fn derivative(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| 1.0 / m)
    }

    fn weight(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.clone()
    }

    fn is_valid_output(&self, y: f64) -> bool {
        y.is_finite() && y >= 0.0
    }

    fn family(&self) -> CanonicalFamily {
        CanonicalFamily::Poisson
    }
}

// =============================================================================
// Identity
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdentityLink;

impl Link for IdentityLink {
    fn name(&self) -> &str {
        "identity"
    }

    fn link(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.clone()
    }

    fn inverse(&self, eta: &Array1<f64>) -> Array1<f64> {
        eta.clone()
    }

    fn derivative(&self, mu: &Array1<f64>) -> Array1<f64> {
        Array1::ones(mu.len())
    }

    fn weight(&self, mu: &Array1<f64>) -> Array1<f64> {
        Array1::ones(mu.len())
    }

    fn is_valid_output(&self, y: f64) -> bool {
        y.is_finite()
    }

    fn family(&self) -> CanonicalFamily {
        CanonicalFamily::Gaussian
    }
}
