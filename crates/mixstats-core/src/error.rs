// =============================================================================
// Error Types
// =============================================================================
//
// One error enum for the whole library. Every fallible operation returns
// `Result<T>`, which is `std::result::Result<T, MixStatsError>`.
//
// WHEN EACH VARIANT IS RAISED:
// ----------------------------
//   - InvalidArgument:     malformed inputs or option combinations, caught
//                          before any iteration starts
//   - DimensionMismatch:   observation / weight / output lengths disagree
//   - NotSupported:        the operation is undefined for this configuration
//                          (multivariate CDF, sampling a component that
//                          cannot sample)
//   - NumericalDegeneracy: a component collapsed or an update went non-finite
//   - EmptyInput:          nothing to fit
//   - LinearAlgebraError:  a decomposition could not produce any solution
//
// Hitting the iteration limit is NOT an error. Engines return their current
// estimate and report `converged = false`.
//
// =============================================================================

use thiserror::Error;

/// Errors produced by distributions, mixtures and regression solvers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixStatsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Linear algebra failure: {0}")]
    LinearAlgebraError(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MixStatsError>;

/// Validate an optional weight slice against the number of observations.
///
/// Weights must be finite and non-negative. Returns the total weight.
pub(crate) fn check_weights(weights: Option<&[f64]>, n: usize) -> Result<f64> {
    match weights {
        None => Ok(n as f64),
        Some(w) => {
            if w.len() != n {
                return Err(MixStatsError::DimensionMismatch(format!(
                    "weights has {} elements but there are {} observations",
                    w.len(),
                    n
                )));
            }
            if let Some(bad) = w.iter().find(|&&wi| !wi.is_finite() || wi < 0.0) {
                return Err(MixStatsError::InvalidArgument(format!(
                    "weights must be finite and non-negative, found {}",
                    bad
                )));
            }
            Ok(w.iter().sum())
        }
    }
}
