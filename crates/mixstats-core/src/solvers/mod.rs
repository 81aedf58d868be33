// =============================================================================
// Fitting Engines
// =============================================================================
//
// Three iterative algorithms live here:
//
//   - em:           Expectation-Maximization for mixture distributions
//   - irls:         Iteratively Reweighted Least Squares for GLMs
//   - lower_bound:  Lower-Bound Newton-Raphson for multinomial logistic
//                   regression
//
// THE SHARED LOOP
// ---------------
// Every engine runs the same outer skeleton:
//
//     validate inputs (fail fast, before iterating)
//     repeat:
//         check the cancellation token
//         one update step
//         feed the change to a ConvergenceTracker
//         report progress (log + optional callback)
//     until the tracker says stop
//
// Running out of iterations is not an error. The result carries
// `converged` and `cancelled` flags and the caller decides what to do.
//
// =============================================================================

pub mod em;
pub mod irls;
pub mod lower_bound;

pub use em::{EmConfig, EmResult, ExpectationMaximization, LogExpectationMaximization};
pub use irls::{fit_glm, IrlsConfig, IrlsResult, IterativeReweightedLeastSquares};
pub use lower_bound::{BoundState, LowerBoundConfig, LowerBoundNewtonRaphson, LowerBoundResult};

use ndarray::Array1;

/// max_i |Δ_i| / |β_i|, falling back to |Δ_i| where β_i is zero.
pub(crate) fn max_relative_change<'a>(
    delta: impl IntoIterator<Item = &'a f64>,
    previous: impl IntoIterator<Item = &'a f64>,
) -> f64 {
    delta
        .into_iter()
        .zip(previous)
        .map(|(&d, &p)| if p == 0.0 { d.abs() } else { (d / p).abs() })
        .fold(0.0, f64::max)
}

/// True when every entry is finite.
pub(crate) fn all_finite(values: &Array1<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_max_relative_change() {
        let delta = [0.1, -0.5, 0.2];
        let prev = [1.0, 2.0, 0.0];
        assert_abs_diff_eq!(max_relative_change(&delta, &prev), 0.25, epsilon = 1e-15);
    }
}
