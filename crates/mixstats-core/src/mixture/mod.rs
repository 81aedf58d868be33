// =============================================================================
// Mixture Distributions
// =============================================================================
//
// A finite mixture is a weighted sum of component densities:
//
//     p(x) = Σ_k π_k p_k(x),      π_k ≥ 0,  Σ_k π_k = 1
//
// Two flavours share the same design:
//
//   - Mixture<T>              scalar observations, T: UnivariateComponent
//   - MultivariateMixture<T>  vector observations, T: MultivariateComponent
//
// Both own their coefficients and components exclusively, hand them to the
// EM engine for fitting (see `solvers::em`), and cache their moments lazily.
//
// MOMENTS
// -------
//     E[X]   = Σ_k π_k E_k[X]
//     Var[X] = E[Var[X | k]] + Var[E[X | k]]
//
// Each moment sits in a `OnceLock`: empty until first asked for, then
// cached. Any mutation (fit, new coefficients) swaps in an empty lock.
//
// SAMPLING
// --------
// Ancestral sampling: draw a component index from the categorical
// distribution given by π (cumulative sums, one uniform draw, find the
// interval), then draw from that component.
//
// =============================================================================

mod multivariate;
mod univariate;

pub use multivariate::MultivariateMixture;
pub use univariate::Mixture;

use rand::distr::{Distribution, StandardUniform};
use rand::RngCore;

use crate::error::{MixStatsError, Result};

/// Tolerance on Σ π_k = 1.
pub const COEFFICIENT_SUM_TOLERANCE: f64 = 1e-9;

/// Validate mixture coefficients and return them normalised to sum to one.
pub(crate) fn normalize_coefficients(coefficients: &[f64], n_components: usize) -> Result<Vec<f64>> {
    if n_components == 0 {
        return Err(MixStatsError::InvalidArgument(
            "a mixture needs at least one component".to_string(),
        ));
    }
    if coefficients.len() != n_components {
        return Err(MixStatsError::DimensionMismatch(format!(
            "{} coefficients for {} components",
            coefficients.len(),
            n_components
        )));
    }
    if let Some(bad) = coefficients.iter().find(|&&c| !c.is_finite() || c < 0.0) {
        return Err(MixStatsError::InvalidArgument(format!(
            "mixture coefficients must be finite and non-negative, found {}",
            bad
        )));
    }
    let total: f64 = coefficients.iter().sum();
    if total <= 0.0 {
        return Err(MixStatsError::InvalidArgument(
            "mixture coefficients sum to zero".to_string(),
        ));
    }
    if (total - 1.0).abs() <= COEFFICIENT_SUM_TOLERANCE {
        return Ok(coefficients.to_vec());
    }
    Ok(coefficients.iter().map(|c| c / total).collect())
}

/// Draw a component index from the categorical distribution `coefficients`.
pub(crate) fn sample_index(coefficients: &[f64], rng: &mut dyn RngCore) -> usize {
    let u: f64 = StandardUniform.sample(rng);
    let mut cumulative = 0.0;
    for (k, &c) in coefficients.iter().enumerate() {
        cumulative += c;
        if u < cumulative {
            return k;
        }
    }
    // Rounding left the cumulative sum just below 1
    coefficients.iter().rposition(|&c| c > 0.0).unwrap_or(0)
}

/// Argmax helper for hard assignments.
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn check_index(k: usize, n_components: usize) -> Result<()> {
    if k >= n_components {
        return Err(MixStatsError::InvalidArgument(format!(
            "component index {} out of range for {} components",
            k, n_components
        )));
    }
    Ok(())
}

/// Observations must be finite before EM starts.
fn check_finite<'v>(observations: impl IntoIterator<Item = &'v f64>) -> Result<()> {
    match observations.into_iter().position(|v| !v.is_finite()) {
        Some(i) => Err(MixStatsError::InvalidArgument(format!(
            "observations must be finite (entry {} is not)",
            i
        ))),
        None => Ok(()),
    }
}
