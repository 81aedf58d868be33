// =============================================================================
// Convergence Tracking and Cancellation
// =============================================================================
//
// Every iterative engine in this crate (EM, IRLS, lower-bound Newton-Raphson)
// decides when to stop the same way:
//
//     1. Feed the tracker one number per iteration
//        (an objective value, or an already-computed parameter change)
//     2. Stop when the change drops below the tolerance,
//        or when the iteration limit is reached
//
// ABSOLUTE VS RELATIVE
// --------------------
// Absolute:  |new - old|            < tolerance
// Relative:  |new - old| / |old|    < tolerance   (absolute when old == 0)
//
// Relative is the right choice for log-likelihoods, whose scale grows with
// the number of observations.
//
// Reaching the iteration limit is not convergence. `has_converged()` only
// reports the tolerance test; `should_stop()` combines both.
//
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MixStatsError, Result};

/// How the change between consecutive values is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceCriterion {
    /// `|new - old|`
    Absolute,
    /// `|new - old| / |old|`
    #[default]
    Relative,
}

/// Tracks iteration count and value changes for an iterative loop.
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    tolerance: f64,
    max_iterations: usize,
    criterion: ConvergenceCriterion,
    iterations: usize,
    previous: Option<f64>,
    current: Option<f64>,
    last_change: Option<f64>,
}

impl ConvergenceTracker {
    /// Create a tracker. `max_iterations == 0` means no limit, in which case
    /// the tolerance must be positive.
    pub fn new(
        tolerance: f64,
        max_iterations: usize,
        criterion: ConvergenceCriterion,
    ) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(MixStatsError::InvalidArgument(format!(
                "tolerance must be finite and non-negative, got {}",
                tolerance
            )));
        }
        if tolerance == 0.0 && max_iterations == 0 {
            return Err(MixStatsError::InvalidArgument(
                "tolerance of 0 with unlimited iterations would never stop".to_string(),
            ));
        }
        Ok(Self {
            tolerance,
            max_iterations,
            criterion,
            iterations: 0,
            previous: None,
            current: None,
            last_change: None,
        })
    }

    /// Record the objective value reached by one more iteration.
    pub fn observe(&mut self, value: f64) {
        self.iterations += 1;
        self.previous = self.current;
        self.current = Some(value);
        self.last_change = self.previous.map(|old| self.change(old, value));
    }

    /// Record a change that the caller has already measured
    /// (for example the maximum relative parameter change).
    pub fn observe_change(&mut self, change: f64) {
        self.iterations += 1;
        self.last_change = Some(change);
    }

    fn change(&self, old: f64, new: f64) -> f64 {
        let delta = (new - old).abs();
        match self.criterion {
            ConvergenceCriterion::Absolute => delta,
            ConvergenceCriterion::Relative => {
                if old != 0.0 {
                    delta / old.abs()
                } else {
                    delta
                }
            }
        }
    }

    /// True once the last recorded change is below the tolerance.
    ///
    /// A NaN change never counts as converged.
    pub fn has_converged(&self) -> bool {
        matches!(self.last_change, Some(c) if c < self.tolerance)
    }

    /// True once the iteration limit has been reached (never, when unlimited).
    pub fn reached_limit(&self) -> bool {
        self.max_iterations > 0 && self.iterations >= self.max_iterations
    }

    /// Whether the loop should terminate.
    pub fn should_stop(&self) -> bool {
        self.has_converged() || self.reached_limit()
    }

    /// Clear counters and history so the tracker can drive another fit.
    pub fn reset(&mut self) {
        self.iterations = 0;
        self.previous = None;
        self.current = None;
        self.last_change = None;
    }

    /// Iterations recorded so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Change measured at the last iteration, if any.
    pub fn last_change(&self) -> Option<f64> {
        self.last_change
    }

    /// Most recent objective value.
    pub fn current_value(&self) -> Option<f64> {
        self.current
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }
}

// =============================================================================
// Cooperative cancellation
// =============================================================================

/// A cloneable flag that asks a running fit to stop at the next iteration
/// boundary. The fit then returns its best-so-far estimate, not an error.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every fit holding a clone of this token to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another fit.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Per-iteration progress report passed to engine callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// 1-based iteration number just completed.
    pub iteration: usize,
    /// Objective after this iteration (log-likelihood for EM and IRLS,
    /// negative log-likelihood for lower-bound Newton-Raphson).
    pub objective: f64,
    /// Change fed to the convergence tracker.
    pub change: Option<f64>,
}

pub(crate) fn is_cancelled(token: Option<&CancellationToken>) -> bool {
    token.is_some_and(|t| t.is_cancelled())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_convergence() {
        let mut tracker = ConvergenceTracker::new(1e-3, 100, ConvergenceCriterion::Relative).unwrap();
        tracker.observe(-100.0);
        assert!(!tracker.has_converged()); // no change recorded yet
        tracker.observe(-90.0);
        assert!(!tracker.has_converged());
        tracker.observe(-89.99);
        assert!(tracker.has_converged());
        assert_eq!(tracker.iterations(), 3);
    }

    #[test]
    fn test_absolute_convergence() {
        let mut tracker = ConvergenceTracker::new(0.5, 0, ConvergenceCriterion::Absolute).unwrap();
        tracker.observe(10.0);
        tracker.observe(10.6);
        assert!(!tracker.has_converged());
        tracker.observe(10.9);
        assert!(tracker.has_converged());
    }

    #[test]
    fn test_relative_falls_back_to_absolute_at_zero() {
        let mut tracker = ConvergenceTracker::new(1e-3, 10, ConvergenceCriterion::Relative).unwrap();
        tracker.observe(0.0);
        tracker.observe(1e-4);
        assert!(tracker.has_converged());
    }

    #[test]
    fn test_iteration_limit_is_not_convergence() {
        let mut tracker = ConvergenceTracker::new(1e-12, 2, ConvergenceCriterion::Relative).unwrap();
        tracker.observe(1.0);
        tracker.observe(2.0);
        assert!(tracker.reached_limit());
        assert!(!tracker.has_converged());
        assert!(tracker.should_stop());
    }

    #[test]
    fn test_unlimited_iterations() {
        let mut tracker = ConvergenceTracker::new(1e-6, 0, ConvergenceCriterion::Absolute).unwrap();
        for i in 0..10_000 {
            tracker.observe(i as f64);
        }
        assert!(!tracker.reached_limit());
    }

    #[test]
    fn test_observe_change() {
        let mut tracker = ConvergenceTracker::new(1e-3, 50, ConvergenceCriterion::Relative).unwrap();
        tracker.observe_change(0.5);
        assert!(!tracker.has_converged());
        tracker.observe_change(1e-4);
        assert!(tracker.has_converged());
        tracker.observe_change(f64::NAN);
        assert!(!tracker.has_converged());
    }

    #[test]
    fn test_reset() {
        let mut tracker = ConvergenceTracker::new(1e-3, 5, ConvergenceCriterion::Relative).unwrap();
        tracker.observe(1.0);
        tracker.observe(1.0);
        assert!(tracker.has_converged());
        tracker.reset();
        assert_eq!(tracker.iterations(), 0);
        assert!(!tracker.has_converged());
        assert!(tracker.current_value().is_none());
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(ConvergenceTracker::new(0.0, 0, ConvergenceCriterion::Absolute).is_err());
        assert!(ConvergenceTracker::new(-1.0, 10, ConvergenceCriterion::Absolute).is_err());
        assert!(ConvergenceTracker::new(f64::NAN, 10, ConvergenceCriterion::Absolute).is_err());
        assert!(ConvergenceTracker::new(0.0, 10, ConvergenceCriterion::Absolute).is_ok());
    }

    #[test]
    fn test_cancellation_token_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!is_cancelled(Some(&token)));
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
        assert!(!is_cancelled(None));
    }
}
