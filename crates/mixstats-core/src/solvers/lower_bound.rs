// =============================================================================
// Lower-Bound Newton-Raphson (multinomial logistic regression)
// =============================================================================
//
// Newton's method for the multinomial log-likelihood needs the Hessian
//
//     H = Σ_i s_i (diag(p_i) − p_i p_iᵀ) ⊗ x_i x_iᵀ
//
// which depends on β and has to be rebuilt and re-factorised every
// iteration. Plain Newton can also overshoot and increase the objective.
//
// THE BOUND
// ---------
// Böhning's bound replaces the per-observation block with a constant that
// dominates it in the Loewner order:
//
//     diag(p) − p pᵀ  ≼  ½ (I − 𝟙𝟙ᵀ/M)
//
// so with S = Σ_i s_i x_i x_iᵀ (the weighted scatter of the design matrix)
//
//     H  ≼  A = ½ (I_K − 𝟙𝟙ᵀ/M) ⊗ S,       K = M − 1
//
// A does not depend on β. It is built and factorised ONCE, and every
// iteration is a single back-substitution:
//
//     g = Σ_i s_i (p_i − y_i) ⊗ x_i          (classes 1..M−1)
//     β ← β − A⁻¹ g
//
// Because A majorises the curvature, each step minimises a quadratic upper
// bound on the negative log-likelihood, which therefore never increases.
//
// BOUND STATE
// -----------
//     Stale ──(fit builds + factorises A)──> Fresh
//     Fresh ──(invalidate_bound)──────────> Stale
//
// While Fresh, later `fit` calls on the same data reuse the factorisation.
// The weighted scatter S is recomputed on every call (one pass over X) and
// compared with the cached one: a different dataset or different sample
// weights, a change in the number of classes or inputs, or
// `update_lower_bound = true` forces a rebuild. A bound built from another
// scatter does not majorise the new Hessian.
//
// Coefficients are flattened row-major from the (M−1)×(P+1) matrix, so
// entry (c, j) sits at index c·(P+1) + j, matching the Kronecker layout.
//
// =============================================================================

use ndarray::{s, Array1, Array2, Axis};

use super::{all_finite, max_relative_change};
use crate::convergence::{
    is_cancelled, CancellationToken, ConvergenceCriterion, ConvergenceTracker, IterationReport,
};
use crate::diagnostics::log_likelihood_multinomial;
use crate::error::{check_weights, MixStatsError, Result};
use crate::linalg::RobustSolver;
use crate::regression::{check_inputs, check_output_len, design_matrix, MultinomialLogisticRegression};

/// Relative difference below which two scatter matrices count as the same data.
const SCATTER_TOLERANCE: f64 = 1e-12;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct LowerBoundConfig {
    /// Stop when the max relative coefficient change falls below this.
    /// Default: 1e-5
    pub tolerance: f64,

    /// Maximum number of iterations (0 = no limit).
    /// Default: 200
    pub max_iterations: usize,

    /// Rebuild the bound on every `fit` call.
    /// Default: false
    pub update_lower_bound: bool,

    /// Compute standard errors from the exact Hessian after the loop.
    /// Default: true
    pub compute_standard_errors: bool,

    pub verbose: bool,

    pub cancellation: Option<CancellationToken>,
}

impl Default for LowerBoundConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 200,
            update_lower_bound: false,
            compute_standard_errors: true,
            verbose: false,
            cancellation: None,
        }
    }
}

impl LowerBoundConfig {
    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Cap the number of iterations (0 = no limit).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Rebuild the bound on every `fit`, even for unchanged data.
    pub fn with_update_lower_bound(mut self, update: bool) -> Self {
        self.update_lower_bound = update;
        self
    }

    /// Compute standard errors after the loop.
    pub fn with_standard_errors(mut self, compute: bool) -> Self {
        self.compute_standard_errors = compute;
        self
    }

    /// Stop at the next iteration boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LowerBoundResult {
    /// (M−1)×(P+1) coefficients, also written into the model.
    pub coefficients: Array2<f64>,

    pub standard_errors: Option<Array2<f64>>,

    pub iterations: usize,

    pub converged: bool,

    pub cancelled: bool,

    pub max_change: f64,

    /// Negative log-likelihood after every iteration (non-increasing).
    pub objective_history: Vec<f64>,

    /// Whether this call built a new bound factorisation.
    pub bound_rebuilt: bool,
}

/// Whether the cached bound factorisation can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundState {
    Stale,
    Fresh,
}

#[derive(Debug, Clone)]
struct CachedBound {
    solver: RobustSolver,
    scatter: Array2<f64>,
    n_classes: usize,
}

impl CachedBound {
    fn matches(&self, scatter: &Array2<f64>, n_classes: usize) -> bool {
        self.n_classes == n_classes
            && self.scatter.dim() == scatter.dim()
            && self
                .scatter
                .iter()
                .zip(scatter.iter())
                .all(|(&a, &b)| (a - b).abs() <= SCATTER_TOLERANCE * a.abs().max(b.abs()).max(1.0))
    }
}

type IterationCallback<'a> = Box<dyn FnMut(&IterationReport) + 'a>;

// =============================================================================
// Engine
// =============================================================================

pub struct LowerBoundNewtonRaphson<'a> {
    config: LowerBoundConfig,
    on_iteration: Option<IterationCallback<'a>>,
    bound: Option<CachedBound>,
}

impl Default for LowerBoundNewtonRaphson<'_> {
    fn default() -> Self {
        Self::new(LowerBoundConfig::default())
    }
}

impl<'a> LowerBoundNewtonRaphson<'a> {
    /// Engine with no cached bound (`BoundState::Stale`).
    pub fn new(config: LowerBoundConfig) -> Self {
        Self {
            config,
            on_iteration: None,
            bound: None,
        }
    }

    /// Register a callback invoked after every completed iteration.
    pub fn on_iteration(mut self, callback: impl FnMut(&IterationReport) + 'a) -> Self {
        self.on_iteration = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &LowerBoundConfig {
        &self.config
    }

    /// Whether the next `fit` on the same data reuses the cached bound.
    pub fn bound_state(&self) -> BoundState {
        if self.bound.is_some() {
            BoundState::Fresh
        } else {
            BoundState::Stale
        }
    }

    /// Drop the cached factorisation so the next `fit` rebuilds it.
    pub fn invalidate_bound(&mut self) {
        self.bound = None;
    }

    /// Fit `model` to integer class labels in `0..n_classes`.
    ///
    /// # Arguments
    /// * `model` - Multinomial model; its coefficients are the starting point
    /// * `inputs` - Predictor matrix (n × p), without an intercept column
    /// * `classes` - Class label of each row
    /// * `weights` - Optional non-negative sample weights (n)
    ///
    /// # Returns
    /// A `LowerBoundResult`. On error the model is left unchanged.
    pub fn fit(
        &mut self,
        model: &mut MultinomialLogisticRegression,
        inputs: &Array2<f64>,
        classes: &[usize],
        weights: Option<&Array1<f64>>,
    ) -> Result<LowerBoundResult> {
        // ---------------------------------------------------------------------
        // Step 0: Validate inputs
        // ---------------------------------------------------------------------
        check_inputs(inputs, model.n_inputs())?;
        let n = inputs.nrows();
        check_output_len(n, classes.len())?;
        if let Some(w) = weights {
            check_output_len(n, w.len())?;
        }
        let total_weight = check_weights(weights.map(|w| w.to_vec()).as_deref(), n)?;
        if total_weight <= 0.0 {
            return Err(MixStatsError::InvalidArgument(
                "sample weights sum to zero".to_string(),
            ));
        }
        model.check_classes(classes)?;

        let mut tracker = ConvergenceTracker::new(
            self.config.tolerance,
            self.config.max_iterations,
            ConvergenceCriterion::Absolute,
        )?;

        let x = design_matrix(inputs);
        let sample_weights = weights.cloned().unwrap_or_else(|| Array1::ones(n));
        let n_classes = model.n_classes();
        let n_params = x.ncols();

        // ---------------------------------------------------------------------
        // Step 1: Build (or reuse) the factorised bound
        // ---------------------------------------------------------------------
        let scatter = weighted_scatter(&x, &sample_weights);
        let reusable = self
            .bound
            .as_ref()
            .is_some_and(|b| b.matches(&scatter, n_classes));
        let bound_rebuilt = self.config.update_lower_bound || !reusable;
        if bound_rebuilt {
            let solver = RobustSolver::new(&bound_matrix(&scatter, n_classes))?;
            if solver.is_pseudo_inverse() {
                log::warn!("lower bound is singular (collinear inputs?); using pseudo-inverse");
            }
            log::debug!(
                "built lower bound for {} classes x {} parameters",
                n_classes,
                n_params
            );
            self.bound = Some(CachedBound {
                solver,
                scatter,
                n_classes,
            });
        }
        let solver = match &self.bound {
            Some(bound) => &bound.solver,
            None => {
                return Err(MixStatsError::LinearAlgebraError(
                    "lower bound factorisation is missing".to_string(),
                ))
            }
        };

        // ---------------------------------------------------------------------
        // Step 2: Bounded Newton iterations on a working copy
        // ---------------------------------------------------------------------
        let targets = one_hot(classes, n_classes);
        let mut working = model.clone();
        let mut history = Vec::new();
        let mut cancelled = false;
        let mut max_change = f64::NAN;

        loop {
            if is_cancelled(self.config.cancellation.as_ref()) {
                cancelled = true;
                log::info!(
                    "lower-bound Newton-Raphson cancelled after {} iterations",
                    tracker.iterations()
                );
                break;
            }

            let probabilities = working.probabilities_design(&x);
            let gradient = gradient(&x, &sample_weights, &probabilities, &targets);
            let delta = solver.solve(&gradient)?;
            if !all_finite(&delta) {
                return Err(MixStatsError::NumericalDegeneracy(format!(
                    "lower-bound iteration {} produced a non-finite update",
                    tracker.iterations() + 1
                )));
            }
            let delta = Array2::from_shape_vec((n_classes - 1, n_params), delta.to_vec())
                .map_err(|e| MixStatsError::DimensionMismatch(e.to_string()))?;

            max_change = max_relative_change(delta.iter(), working.coefficients().iter());
            *working.coefficients_mut() -= &delta;
            tracker.observe_change(max_change);

            let objective = -log_likelihood_multinomial(
                &working.probabilities_design(&x),
                classes,
                Some(&sample_weights),
            );
            history.push(objective);

            let report = IterationReport {
                iteration: tracker.iterations(),
                objective,
                change: Some(max_change),
            };
            if self.config.verbose {
                log::info!(
                    "LBNR iteration {}: objective = {:.6}, max change = {:.2e}",
                    report.iteration,
                    objective,
                    max_change
                );
            } else {
                log::debug!(
                    "LBNR iteration {}: objective = {:.6}, max change = {:.2e}",
                    report.iteration,
                    objective,
                    max_change
                );
            }
            if let Some(callback) = self.on_iteration.as_mut() {
                callback(&report);
            }

            if tracker.should_stop() {
                break;
            }
        }

        // ---------------------------------------------------------------------
        // Step 3: Standard errors from the exact Hessian
        // ---------------------------------------------------------------------
        let standard_errors = if self.config.compute_standard_errors {
            let probabilities = working.probabilities_design(&x);
            let hessian = hessian_matrix(&x, &sample_weights, &probabilities);
            let variances = RobustSolver::new(&hessian)?.inverse().diag().mapv(|v| v.max(0.0).sqrt());
            Some(
                Array2::from_shape_vec((n_classes - 1, n_params), variances.to_vec())
                    .map_err(|e| MixStatsError::DimensionMismatch(e.to_string()))?,
            )
        } else {
            None
        };

        if !tracker.has_converged() && !cancelled {
            log::warn!(
                "lower-bound Newton-Raphson did not converge in {} iterations (max change {:.2e})",
                tracker.iterations(),
                max_change
            );
        }

        let coefficients = working.coefficients().clone();
        working.set_standard_errors(standard_errors.clone());
        *model = working;

        Ok(LowerBoundResult {
            coefficients,
            standard_errors,
            iterations: tracker.iterations(),
            converged: tracker.has_converged(),
            cancelled,
            max_change,
            objective_history: history,
            bound_rebuilt,
        })
    }
}

// =============================================================================
// Block builders
// =============================================================================

/// S = Xᵀ diag(s) X
fn weighted_scatter(x: &Array2<f64>, sample_weights: &Array1<f64>) -> Array2<f64> {
    let xw = x * &sample_weights.view().insert_axis(Axis(1));
    x.t().dot(&xw)
}

/// A = ½ (I_K − 𝟙𝟙ᵀ/M) ⊗ S, assembled block by block.
pub(crate) fn bound_matrix(scatter: &Array2<f64>, n_classes: usize) -> Array2<f64> {
    let p = scatter.nrows();
    let k = n_classes - 1;
    let m = n_classes as f64;
    let mut a = Array2::<f64>::zeros((k * p, k * p));
    for r in 0..k {
        for c in 0..k {
            let delta = if r == c { 1.0 } else { 0.0 };
            let factor = 0.5 * (delta - 1.0 / m);
            a.slice_mut(s![r * p..(r + 1) * p, c * p..(c + 1) * p])
                .assign(&(scatter * factor));
        }
    }
    a
}

/// Exact Hessian of the negative log-likelihood, block (a, b) equal to
/// Σ_i s_i p_ia (δ_ab − p_ib) x_i x_iᵀ over classes 1..M−1.
fn hessian_matrix(x: &Array2<f64>, sample_weights: &Array1<f64>, probabilities: &Array2<f64>) -> Array2<f64> {
    let (n, p) = x.dim();
    let k = probabilities.ncols() - 1;
    let mut h = Array2::<f64>::zeros((k * p, k * p));
    for a in 0..k {
        for b in a..k {
            let w: Array1<f64> = (0..n)
                .map(|i| {
                    let pa = probabilities[[i, a + 1]];
                    let pb = probabilities[[i, b + 1]];
                    let delta = if a == b { 1.0 } else { 0.0 };
                    sample_weights[i] * pa * (delta - pb)
                })
                .collect();
            let block = weighted_scatter(x, &w);
            h.slice_mut(s![a * p..(a + 1) * p, b * p..(b + 1) * p]).assign(&block);
            if a != b {
                h.slice_mut(s![b * p..(b + 1) * p, a * p..(a + 1) * p])
                    .assign(&block.t());
            }
        }
    }
    h
}

/// g = vec(Rᵀ X), R_ic = s_i (p_ic − y_ic) for c = 1..M−1.
fn gradient(
    x: &Array2<f64>,
    sample_weights: &Array1<f64>,
    probabilities: &Array2<f64>,
    targets: &Array2<f64>,
) -> Array1<f64> {
    let residuals = (&probabilities.slice(s![.., 1..]) - &targets.slice(s![.., 1..]))
        * &sample_weights.view().insert_axis(Axis(1));
    residuals.t().dot(x).iter().cloned().collect()
}

fn one_hot(classes: &[usize], n_classes: usize) -> Array2<f64> {
    let mut y = Array2::zeros((classes.len(), n_classes));
    for (i, &c) in classes.iter().enumerate() {
        y[[i, c]] = 1.0;
    }
    y
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Three overlapping clusters along one axis.
    fn three_class_data() -> (Array2<f64>, Vec<usize>) {
        let inputs = array![
            [-3.0], [-2.5], [-2.0], [-1.5], [-0.5],
            [-0.8], [-0.2], [0.0], [0.4], [1.1],
            [0.7], [1.5], [2.0], [2.6], [3.1]
        ];
        let classes = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2];
        (inputs, classes)
    }

    #[test]
    fn test_bound_dominates_hessian() {
        let (inputs, _) = three_class_data();
        let x = design_matrix(&inputs);
        let w = Array1::ones(x.nrows());
        let model = MultinomialLogisticRegression::new(1, 3).unwrap();
        let a = bound_matrix(&weighted_scatter(&x, &w), 3);
        let h = hessian_matrix(&x, &w, &model.probabilities_design(&x));
        // A − H is positive semi-definite: check vᵀ(A − H)v ≥ 0 on a few directions
        let diff = &a - &h;
        for v in [
            array![1.0, 0.0, 0.0, 0.0],
            array![1.0, -1.0, 0.5, 2.0],
            array![0.3, 0.3, -0.3, -0.3],
        ] {
            assert!(v.dot(&diff.dot(&v)) >= -1e-12);
        }
    }

    #[test]
    fn test_objective_never_increases() {
        let (inputs, classes) = three_class_data();
        let mut model = MultinomialLogisticRegression::new(1, 3).unwrap();
        let start = -model.log_likelihood(&inputs, &classes, None).unwrap();
        let mut engine = LowerBoundNewtonRaphson::default();
        let result = engine.fit(&mut model, &inputs, &classes, None).unwrap();
        assert!(result.converged);
        assert!(result.objective_history[0] < start);
        for pair in result.objective_history.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12);
        }
    }

    #[test]
    fn test_gradient_vanishes_at_solution() {
        let (inputs, classes) = three_class_data();
        let mut model = MultinomialLogisticRegression::new(1, 3).unwrap();
        let config = LowerBoundConfig::default().with_tolerance(1e-9).with_max_iterations(2000);
        LowerBoundNewtonRaphson::new(config)
            .fit(&mut model, &inputs, &classes, None)
            .unwrap();
        let x = design_matrix(&inputs);
        let g = gradient(
            &x,
            &Array1::ones(x.nrows()),
            &model.probabilities_design(&x),
            &one_hot(&classes, 3),
        );
        for v in g.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_bound_reused_until_invalidated() {
        let (inputs, classes) = three_class_data();
        let mut engine = LowerBoundNewtonRaphson::default();
        assert_eq!(engine.bound_state(), BoundState::Stale);

        let mut model = MultinomialLogisticRegression::new(1, 3).unwrap();
        let first = engine.fit(&mut model, &inputs, &classes, None).unwrap();
        assert!(first.bound_rebuilt);
        assert_eq!(engine.bound_state(), BoundState::Fresh);

        let mut again = MultinomialLogisticRegression::new(1, 3).unwrap();
        let second = engine.fit(&mut again, &inputs, &classes, None).unwrap();
        assert!(!second.bound_rebuilt);
        assert_eq!(engine.bound_state(), BoundState::Fresh);

        engine.invalidate_bound();
        assert_eq!(engine.bound_state(), BoundState::Stale);
        let third = engine.fit(&mut again, &inputs, &classes, None).unwrap();
        assert!(third.bound_rebuilt);
    }

    #[test]
    fn test_shape_change_forces_rebuild() {
        let (inputs, classes) = three_class_data();
        let mut engine = LowerBoundNewtonRaphson::default();
        let mut three = MultinomialLogisticRegression::new(1, 3).unwrap();
        engine.fit(&mut three, &inputs, &classes, None).unwrap();

        let binary: Vec<usize> = classes.iter().map(|&c| usize::from(c > 0)).collect();
        let mut two = MultinomialLogisticRegression::new(1, 2).unwrap();
        let result = engine.fit(&mut two, &inputs, &binary, None).unwrap();
        assert!(result.bound_rebuilt);
    }

    #[test]
    fn test_new_data_of_same_shape_rebuilds_bound() {
        let small = array![[-0.3], [-0.2], [-0.1], [0.1], [0.2], [0.3]];
        let wide = array![[-30.0], [-12.0], [-4.0], [3.0], [11.0], [25.0]];
        let classes = vec![0, 1, 0, 2, 1, 2];
        let mut engine = LowerBoundNewtonRaphson::new(
            LowerBoundConfig::default()
                .with_max_iterations(50)
                .with_standard_errors(false),
        );

        let mut first = MultinomialLogisticRegression::new(1, 3).unwrap();
        engine.fit(&mut first, &small, &classes, None).unwrap();

        let mut second = MultinomialLogisticRegression::new(1, 3).unwrap();
        let start = -second.log_likelihood(&wide, &classes, None).unwrap();
        let result = engine.fit(&mut second, &wide, &classes, None).unwrap();
        assert!(result.bound_rebuilt);
        let mut previous = start;
        for &objective in &result.objective_history {
            assert!(objective <= previous + 1e-12, "{} rose above {}", objective, previous);
            previous = objective;
        }

        // Same inputs, different sample weights
        let weights = array![1.0, 2.0, 1.0, 3.0, 1.0, 1.0];
        let reweighted = engine.fit(&mut second, &wide, &classes, Some(&weights)).unwrap();
        assert!(reweighted.bound_rebuilt);
    }

    #[test]
    fn test_rejects_out_of_range_labels() {
        let (inputs, mut classes) = three_class_data();
        classes[0] = 3;
        let mut model = MultinomialLogisticRegression::new(1, 3).unwrap();
        let before = model.coefficients().clone();
        let result = LowerBoundNewtonRaphson::default().fit(&mut model, &inputs, &classes, None);
        assert!(matches!(result, Err(MixStatsError::InvalidArgument(_))));
        assert_eq!(model.coefficients(), &before);
    }

    #[test]
    fn test_standard_errors_shape() {
        let (inputs, classes) = three_class_data();
        let mut model = MultinomialLogisticRegression::new(1, 3).unwrap();
        let result = LowerBoundNewtonRaphson::default()
            .fit(&mut model, &inputs, &classes, None)
            .unwrap();
        let se = result.standard_errors.unwrap();
        assert_eq!(se.dim(), (2, 2));
        assert!(se.iter().all(|&v| v > 0.0));
        assert_eq!(model.standard_errors(), Some(&se));
    }
}
