// =============================================================================
// IRLS: Iteratively Reweighted Least Squares
// =============================================================================
//
// Fits a GLM's coefficients by Newton-Raphson on the negative
// log-likelihood, written as a sequence of weighted least-squares solves.
//
// THE ITERATION
// -------------
// With X the design matrix (intercept first), s the sample weights and
// β the current coefficients:
//
//     η = Xβ
//     μ = g⁻¹(η)
//     w = dμ/dη at μ                       (link.weight)
//     g = Xᵀ diag(s) (μ − y)  + λβ          gradient of −ℓ
//     H = Xᵀ diag(s·w) X      + λI          curvature of −ℓ
//     solve H Δ = g
//     β ← β − Δ
//
// For canonical links H is the exact Hessian, so this is Newton's method
// and converges quadratically near the optimum.
//
// SINGULAR CURVATURE
// ------------------
// Collinear inputs or (quasi-)separated classes make H singular. The solve
// goes through `RobustSolver`, which falls back from Cholesky to an SVD
// pseudo-inverse instead of failing.
//
// CONVERGENCE
// -----------
// The tracker is fed max_i |Δ_i| / |β_i| (plain |Δ_i| where β_i = 0). Hitting
// the iteration cap is not an error; check `converged` on the result.
//
// STARTING POINT
// --------------
// An all-zero model starts from the intercept-only fit η = g(ȳ), which keeps
// the log link from overshooting on the first step.
//
// =============================================================================

use ndarray::{Array1, Array2, Axis};

use super::{all_finite, max_relative_change};
use crate::convergence::{
    is_cancelled, CancellationToken, ConvergenceCriterion, ConvergenceTracker, IterationReport,
};
use crate::diagnostics;
use crate::error::{check_weights, MixStatsError, Result};
use crate::linalg::RobustSolver;
use crate::links::Link;
use crate::regression::{check_inputs, check_output_len, design_matrix, GeneralizedLinearRegression};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration options for IRLS.
#[derive(Debug, Clone)]
pub struct IrlsConfig {
    /// Stop when the max relative coefficient change falls below this.
    /// Default: 1e-5
    pub tolerance: f64,

    /// Maximum number of iterations (0 = no limit).
    /// Default: 50
    pub max_iterations: usize,

    /// L2 penalty λ added as λI to the curvature and λβ to the gradient.
    /// Default: 0.0
    pub regularization: f64,

    /// Compute sqrt(diag(H⁻¹)) once after the loop.
    /// Default: true
    pub compute_standard_errors: bool,

    /// Log every iteration at info level instead of debug.
    pub verbose: bool,

    /// Checked once at the top of every iteration.
    pub cancellation: Option<CancellationToken>,
}

impl Default for IrlsConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 50,
            regularization: 0.0,
            compute_standard_errors: true,
            verbose: false,
            cancellation: None,
        }
    }
}

impl IrlsConfig {
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

    /// Ridge penalty λ added to the curvature diagonal.
    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
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

// =============================================================================
// Result Structure
// =============================================================================

#[derive(Debug, Clone)]
pub struct IrlsResult {
    /// Fitted β, intercept first. Also written into the model.
    pub coefficients: Array1<f64>,

    /// sqrt(diag(H⁻¹)) at the final β, when requested.
    pub standard_errors: Option<Array1<f64>>,

    pub iterations: usize,

    pub converged: bool,

    /// True when the run stopped because the cancellation token fired.
    pub cancelled: bool,

    /// Max relative coefficient change of the last iteration.
    pub max_change: f64,

    /// Log-likelihood after every iteration.
    pub log_likelihood_history: Vec<f64>,
}

// =============================================================================
// Engine
// =============================================================================

type IterationCallback<'a> = Box<dyn FnMut(&IterationReport) + 'a>;

/// IRLS engine for [`GeneralizedLinearRegression`] models.
///
/// # Example
///
/// ```
/// use mixstats_core::regression::LogisticRegression;
/// use mixstats_core::solvers::{IrlsConfig, IterativeReweightedLeastSquares};
/// use ndarray::array;
///
/// let inputs = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
/// let outputs = array![0.0, 0.0, 1.0, 0.0, 1.0, 1.0];
/// let mut model = LogisticRegression::new(1);
/// let result = IterativeReweightedLeastSquares::new(IrlsConfig::default())
///     .fit(&mut model, &inputs, &outputs, None)
///     .unwrap();
/// assert!(result.converged);
/// assert!(model.coefficients()[1] > 0.0);
/// ```
pub struct IterativeReweightedLeastSquares<'a> {
    config: IrlsConfig,
    on_iteration: Option<IterationCallback<'a>>,
}

impl Default for IterativeReweightedLeastSquares<'_> {
    fn default() -> Self {
        Self::new(IrlsConfig::default())
    }
}

impl<'a> IterativeReweightedLeastSquares<'a> {
    /// Engine without a progress callback.
    pub fn new(config: IrlsConfig) -> Self {
        Self {
            config,
            on_iteration: None,
        }
    }

    /// Register a callback invoked after every completed iteration.
    pub fn on_iteration(mut self, callback: impl FnMut(&IterationReport) + 'a) -> Self {
        self.on_iteration = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &IrlsConfig {
        &self.config
    }

    /// Fit `model` to `outputs` given `inputs` (N×P, no intercept column).
    ///
    /// On success the fitted coefficients (and standard errors) are written
    /// into the model. On error the model is left unchanged.
    pub fn fit<L: Link>(
        &mut self,
        model: &mut GeneralizedLinearRegression<L>,
        inputs: &Array2<f64>,
        outputs: &Array1<f64>,
        weights: Option<&Array1<f64>>,
    ) -> Result<IrlsResult> {
        // ---------------------------------------------------------------------
        // Step 0: Validate inputs
        // ---------------------------------------------------------------------
        check_inputs(inputs, model.n_inputs())?;
        let n = inputs.nrows();
        check_output_len(n, outputs.len())?;
        if let Some(w) = weights {
            check_output_len(n, w.len())?;
        }
        let total_weight = check_weights(weights.map(|w| w.to_vec()).as_deref(), n)?;
        if total_weight <= 0.0 {
            return Err(MixStatsError::InvalidArgument(
                "sample weights sum to zero".to_string(),
            ));
        }
        let link = model.link();
        if let Some(bad) = outputs.iter().find(|&&y| !link.is_valid_output(y)) {
            return Err(MixStatsError::InvalidArgument(format!(
                "output {} is outside the domain of the {} link",
                bad,
                link.name()
            )));
        }
        let lambda = self.config.regularization;
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(MixStatsError::InvalidArgument(format!(
                "regularization must be finite and non-negative, got {}",
                lambda
            )));
        }

        let mut tracker = ConvergenceTracker::new(
            self.config.tolerance,
            self.config.max_iterations,
            ConvergenceCriterion::Absolute,
        )?;

        // ---------------------------------------------------------------------
        // Step 1: Design matrix and starting point
        // ---------------------------------------------------------------------
        let x = design_matrix(inputs);
        let sample_weights = weights.cloned().unwrap_or_else(|| Array1::ones(n));
        let family = link.family();

        let mut beta = model.coefficients().clone();
        if beta.iter().all(|&b| b == 0.0) {
            let y_mean = outputs.dot(&sample_weights) / total_weight;
            let start = link.link(&Array1::from_elem(1, y_mean))[0];
            if start.is_finite() {
                beta[0] = start;
            }
        }

        let mut history = Vec::new();
        let mut cancelled = false;
        let mut max_change = f64::NAN;

        // ---------------------------------------------------------------------
        // Step 2: Newton iterations
        // ---------------------------------------------------------------------
        loop {
            if is_cancelled(self.config.cancellation.as_ref()) {
                cancelled = true;
                log::info!("IRLS cancelled after {} iterations", tracker.iterations());
                break;
            }

            let mu = link.inverse(&x.dot(&beta));

            // Gradient g = Xᵀ diag(s)(μ − y) + λβ
            let residuals = (&mu - outputs) * &sample_weights;
            let mut gradient = x.t().dot(&residuals);
            gradient.scaled_add(lambda, &beta);

            let curvature = curvature(&x, &(&link.weight(&mu) * &sample_weights), lambda);
            let solver = RobustSolver::new(&curvature)?;
            if solver.is_pseudo_inverse() {
                log::warn!(
                    "IRLS iteration {}: curvature is singular, using pseudo-inverse",
                    tracker.iterations() + 1
                );
            }
            let delta = solver.solve(&gradient)?;
            if !all_finite(&delta) {
                return Err(MixStatsError::NumericalDegeneracy(format!(
                    "IRLS iteration {} produced a non-finite update",
                    tracker.iterations() + 1
                )));
            }

            max_change = max_relative_change(delta.iter(), beta.iter());
            beta -= &delta;
            tracker.observe_change(max_change);

            let fitted = link.inverse(&x.dot(&beta));
            let log_likelihood =
                diagnostics::log_likelihood(family, outputs, &fitted, Some(&sample_weights));
            history.push(log_likelihood);

            let report = IterationReport {
                iteration: tracker.iterations(),
                objective: log_likelihood,
                change: Some(max_change),
            };
            if self.config.verbose {
                log::info!(
                    "IRLS iteration {}: log-likelihood = {:.6}, max change = {:.2e}",
                    report.iteration,
                    log_likelihood,
                    max_change
                );
            } else {
                log::debug!(
                    "IRLS iteration {}: log-likelihood = {:.6}, max change = {:.2e}",
                    report.iteration,
                    log_likelihood,
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
        // Step 3: Standard errors, computed once at the final β
        // ---------------------------------------------------------------------
        let standard_errors = if self.config.compute_standard_errors {
            let mu = link.inverse(&x.dot(&beta));
            let h = curvature(&x, &(&link.weight(&mu) * &sample_weights), lambda);
            let inverse = RobustSolver::new(&h)?.inverse();
            Some(inverse.diag().mapv(|v| v.max(0.0).sqrt()))
        } else {
            None
        };

        if !tracker.has_converged() && !cancelled {
            log::warn!(
                "IRLS did not converge in {} iterations (max change {:.2e})",
                tracker.iterations(),
                max_change
            );
        }

        *model.coefficients_mut() = beta.clone();
        model.set_standard_errors(standard_errors.clone());

        Ok(IrlsResult {
            coefficients: beta,
            standard_errors,
            iterations: tracker.iterations(),
            converged: tracker.has_converged(),
            cancelled,
            max_change,
            log_likelihood_history: history,
        })
    }
}

/// Fit a GLM by IRLS with no progress callback.
///
/// # Arguments
/// * `model` - Model to fit; its current coefficients are the starting point
/// * `inputs` - Predictor matrix (n × p), without an intercept column
/// * `outputs` - Response vector (n), inside the link's domain
/// * `weights` - Optional non-negative sample weights (n)
/// * `config` - Tolerance, iteration cap, ridge penalty
///
/// # Returns
/// An `IrlsResult`; the fitted coefficients and standard errors are also
/// written into `model`.
pub fn fit_glm<L: Link>(
    model: &mut GeneralizedLinearRegression<L>,
    inputs: &Array2<f64>,
    outputs: &Array1<f64>,
    weights: Option<&Array1<f64>>,
    config: &IrlsConfig,
) -> Result<IrlsResult> {
    IterativeReweightedLeastSquares::new(config.clone()).fit(model, inputs, outputs, weights)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Xᵀ diag(w) X + λI, with rows of X scaled by w before the product.
fn curvature(x: &Array2<f64>, w: &Array1<f64>, lambda: f64) -> Array2<f64> {
    let xw = x * &w.view().insert_axis(Axis(1));
    let mut h = x.t().dot(&xw);
    if lambda > 0.0 {
        for j in 0..h.nrows() {
            h[[j, j]] += lambda;
        }
    }
    h
}

// =============================================================================
// Tests
// =============================================================================
