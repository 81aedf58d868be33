// =============================================================================
// Expectation-Maximization for Finite Mixtures
// =============================================================================
//
// A finite mixture says each observation came from one of K components, but
// we never see which one. EM alternates between guessing the assignments
// softly and refitting the components against those guesses:
//
//     Start with coefficients π and components p_k
//     Repeat:
//         E-step:  r_ik = π_k p_k(x_i) / Σ_j π_j p_j(x_i)
//         M-step:  π_k  = Σ_i w_i r_ik / Σ_i w_i
//                  p_k  = weighted fit of component k with weights w_i r_ik
//         LL = Σ_i w_i log Σ_k π_k p_k(x_i)
//     until LL stops improving
//
// Each EM iteration can only increase the log-likelihood, so the LL trace
// is non-decreasing. It converges to a local maximum, so initialisation
// matters.
//
// STANDARD VS LOG DOMAIN
// ----------------------
// The standard domain multiplies densities directly. When every component
// assigns a tiny density to a point (far outliers, high dimensions) the
// products underflow to 0 and the row cannot be normalised. The log domain
// normalises with log-sum-exp instead and never underflows.
//
// The log-domain path rejects non-uniform observation weights before the
// first iteration. Uniform weights are treated as unweighted.
//
// ONE MATRIX, TWO USES
// --------------------
// The N×K matrix L_ik = ln π_k + ln p_k(x_i) gives both the log-likelihood of
// the current parameters (row-wise log-sum-exp) and the next E-step. It is
// computed once per parameter set.
//
// PARALLELISM
// -----------
// Rows of L are independent, and so are the component fits in an M-step.
// Both run on rayon when `parallel` is set. The responsibilities matrix is
// fully computed before any component is refit, which is the barrier
// between the two phases.
//
// =============================================================================

use std::marker::PhantomData;

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::convergence::{
    is_cancelled, CancellationToken, ConvergenceCriterion, ConvergenceTracker, IterationReport,
};
use crate::distributions::Component;
use crate::error::{check_weights, MixStatsError, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Options for an EM run. `O` are the options forwarded to every
/// component's weighted fit.
#[derive(Debug, Clone)]
pub struct EmConfig<O> {
    /// Stop once the change in log-likelihood is below this.
    /// Default: 1e-5 (relative)
    pub tolerance: f64,

    /// Iteration cap; 0 means no cap (tolerance only).
    /// Default: 500
    pub max_iterations: usize,

    /// How the log-likelihood change is measured.
    pub criterion: ConvergenceCriterion,

    /// Normalise responsibilities with log-sum-exp.
    /// Default: false
    pub log_domain: bool,

    /// Use rayon for the E-step rows and the M-step component fits.
    /// Default: true
    pub parallel: bool,

    /// Log every iteration at info level instead of debug.
    pub verbose: bool,

    /// Options passed to each component's `fit_weighted`.
    pub inner_options: O,

    /// Checked once per iteration.
    pub cancellation: Option<CancellationToken>,
}

impl<O: Default> Default for EmConfig<O> {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 500,
            criterion: ConvergenceCriterion::Relative,
            log_domain: false,
            parallel: true,
            verbose: false,
            inner_options: O::default(),
            cancellation: None,
        }
    }
}

impl<O> EmConfig<O> {
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

    /// Measure changes in the log-likelihood absolutely or relatively.
    pub fn with_criterion(mut self, criterion: ConvergenceCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Normalise responsibilities with log-sum-exp instead of direct division.
    pub fn with_log_domain(mut self, log_domain: bool) -> Self {
        self.log_domain = log_domain;
        self
    }

    /// Run the E-step rows and M-step fits on rayon.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Options forwarded to every component fit in the M-step.
    pub fn with_inner_options(mut self, inner_options: O) -> Self {
        self.inner_options = inner_options;
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

/// Outcome of an EM run.
#[derive(Debug, Clone)]
pub struct EmResult {
    /// Weighted log-likelihood of the final parameters.
    pub log_likelihood: f64,

    /// Completed iterations.
    pub iterations: usize,

    /// Did the log-likelihood change fall below the tolerance?
    pub converged: bool,

    /// Was the run stopped through the cancellation token?
    pub cancelled: bool,

    /// Log-likelihood after each iteration (non-decreasing).
    pub log_likelihood_history: Vec<f64>,

    /// N×K responsibilities under the final parameters.
    pub responsibilities: Array2<f64>,
}

// =============================================================================
// Engine
// =============================================================================

type IterationCallback<'a> = Box<dyn FnMut(&IterationReport) + 'a>;

/// EM engine over a borrowed coefficient vector and component set.
///
/// The engine works on copies and writes the fitted state back only when
/// the run succeeds, so a failed fit leaves the caller's mixture intact.
pub struct ExpectationMaximization<'a, X, T: Component<X>> {
    coefficients: &'a mut [f64],
    components: &'a mut [T],
    config: EmConfig<T::Options>,
    on_iteration: Option<IterationCallback<'a>>,
    _observation: PhantomData<fn(&X)>,
}

/// Constructor for the log-domain variant of [`ExpectationMaximization`].
pub struct LogExpectationMaximization;

impl LogExpectationMaximization {
    /// Same engine with `log_domain` forced on.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<'a, X: Sync, T: Component<X>>(
        coefficients: &'a mut [f64],
        components: &'a mut [T],
        config: EmConfig<T::Options>,
    ) -> Result<ExpectationMaximization<'a, X, T>> {
        ExpectationMaximization::new(coefficients, components, config.with_log_domain(true))
    }
}

impl<'a, X, T> ExpectationMaximization<'a, X, T>
where
    X: Sync,
    T: Component<X>,
{
    pub fn new(
        coefficients: &'a mut [f64],
        components: &'a mut [T],
        config: EmConfig<T::Options>,
    ) -> Result<Self> {
        if components.is_empty() {
            return Err(MixStatsError::InvalidArgument(
                "EM needs at least one component".to_string(),
            ));
        }
        if coefficients.len() != components.len() {
            return Err(MixStatsError::DimensionMismatch(format!(
                "{} coefficients for {} components",
                coefficients.len(),
                components.len()
            )));
        }
        Ok(Self {
            coefficients,
            components,
            config,
            on_iteration: None,
            _observation: PhantomData,
        })
    }

    /// Register a callback invoked after every completed iteration.
    pub fn on_iteration(mut self, callback: impl FnMut(&IterationReport) + 'a) -> Self {
        self.on_iteration = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &EmConfig<T::Options> {
        &self.config
    }

    /// Run EM to convergence (or the iteration cap, or cancellation).
    pub fn fit(&mut self, observations: &[X], weights: Option<&[f64]>) -> Result<EmResult> {
        // ---------------------------------------------------------------------
        // Step 0: Validate everything before iterating
        // ---------------------------------------------------------------------
        let n = observations.len();
        if n == 0 {
            return Err(MixStatsError::EmptyInput("no observations".to_string()));
        }
        let total_weight = check_weights(weights, n)?;
        if total_weight <= 0.0 {
            return Err(MixStatsError::InvalidArgument(
                "observation weights sum to zero".to_string(),
            ));
        }
        let uniform = weights.map_or(true, |w| w.iter().all(|&wi| wi == w[0]));
        if self.config.log_domain && !uniform {
            return Err(MixStatsError::InvalidArgument(
                "log-domain EM does not support non-uniform observation weights".to_string(),
            ));
        }
        // Uniform weights only rescale the log-likelihood
        let scale = if uniform { weights.map_or(1.0, |w| w[0]) } else { 1.0 };
        let weights = if uniform { None } else { weights };
        let total_weight = if uniform { n as f64 } else { total_weight };

        if let Some(bad) = self.coefficients.iter().find(|&&c| !c.is_finite() || c < 0.0) {
            return Err(MixStatsError::InvalidArgument(format!(
                "mixture coefficients must be finite and non-negative, found {}",
                bad
            )));
        }

        let mut tracker = ConvergenceTracker::new(
            self.config.tolerance,
            self.config.max_iterations,
            self.config.criterion,
        )?;

        // ---------------------------------------------------------------------
        // Step 1: Work on copies of the parameters
        // ---------------------------------------------------------------------
        let mut pi: Vec<f64> = self.coefficients.to_vec();
        let mut components: Vec<T> = self.components.to_vec();
        let k = components.len();

        let mut log_prob = log_probabilities(&pi, &components, observations, self.config.parallel);
        if let Some(i) = log_prob.outer_iter().position(|row| row.iter().any(|v| v.is_nan())) {
            return Err(MixStatsError::InvalidArgument(format!(
                "observation {} has an undefined density (NaN or malformed value)",
                i
            )));
        }
        let mut log_likelihood = scale * weighted_log_likelihood(&log_prob, weights);
        let mut history = Vec::new();
        let mut cancelled = false;

        // ---------------------------------------------------------------------
        // Step 2: EM iterations
        // ---------------------------------------------------------------------
        loop {
            if is_cancelled(self.config.cancellation.as_ref()) {
                cancelled = true;
                break;
            }

            // E-step
            let resp = responsibilities(&log_prob, self.config.log_domain);

            // M-step: coefficients
            let mass: Vec<f64> = (0..k)
                .map(|c| {
                    resp.column(c)
                        .iter()
                        .enumerate()
                        .map(|(i, r)| r * weights.map_or(1.0, |w| w[i]))
                        .sum::<f64>()
                })
                .collect();
            for c in 0..k {
                pi[c] = mass[c] / total_weight;
            }

            // M-step: components, each against its own responsibility weights
            let options = &self.config.inner_options;
            let refit = |(c, component): (usize, &mut T)| -> Result<()> {
                let component_weights: Vec<f64> = resp
                    .column(c)
                    .iter()
                    .enumerate()
                    .map(|(i, r)| r * weights.map_or(1.0, |w| w[i]))
                    .collect();
                component.fit_weighted(observations, Some(&component_weights), options)?;
                let collapsed = observations
                    .iter()
                    .all(|x| !(component.log_density(x) > f64::NEG_INFINITY));
                if collapsed {
                    return Err(MixStatsError::NumericalDegeneracy(
                        "density is zero at every observation".to_string(),
                    ));
                }
                Ok(())
            };
            let outcomes: Vec<Result<()>> = if self.config.parallel {
                components.par_iter_mut().enumerate().map(refit).collect()
            } else {
                components.iter_mut().enumerate().map(refit).collect()
            };

            // All components have been updated; now surface any failure
            if let Some((c, err)) = outcomes
                .into_iter()
                .enumerate()
                .find_map(|(c, r)| r.err().map(|e| (c, e)))
            {
                log::warn!("EM iteration {}: component {} failed: {}", tracker.iterations() + 1, c, err);
                return Err(match err {
                    MixStatsError::NumericalDegeneracy(msg) => MixStatsError::NumericalDegeneracy(
                        format!("component {} collapsed: {}", c, msg),
                    ),
                    other => other,
                });
            }

            // Log-likelihood of the new parameters
            log_prob = log_probabilities(&pi, &components, observations, self.config.parallel);
            log_likelihood = scale * weighted_log_likelihood(&log_prob, weights);
            tracker.observe(log_likelihood);
            history.push(log_likelihood);

            let report = IterationReport {
                iteration: tracker.iterations(),
                objective: log_likelihood,
                change: tracker.last_change(),
            };
            if self.config.verbose {
                log::info!(
                    "EM iteration {}: log-likelihood = {:.6}, change = {:.2e}",
                    report.iteration,
                    log_likelihood,
                    report.change.unwrap_or(f64::NAN)
                );
            } else {
                log::debug!(
                    "EM iteration {}: log-likelihood = {:.6}, change = {:.2e}",
                    report.iteration,
                    log_likelihood,
                    report.change.unwrap_or(f64::NAN)
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
        // Step 3: Commit the fitted state
        // ---------------------------------------------------------------------
        self.coefficients.copy_from_slice(&pi);
        self.components.clone_from_slice(&components);

        Ok(EmResult {
            log_likelihood,
            iterations: tracker.iterations(),
            converged: tracker.has_converged(),
            cancelled,
            log_likelihood_history: history,
            responsibilities: responsibilities(&log_prob, self.config.log_domain),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// log Σ exp(v) without overflow. Returns -∞ for an empty or all -∞ input.
pub fn log_sum_exp<'v, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'v f64>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let max = iter.clone().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    max + iter.map(|&v| (v - max).exp()).sum::<f64>().ln()
}

/// N×K matrix of ln π_k + ln p_k(x_i).
pub(crate) fn log_probabilities<X: Sync, T: Component<X>>(
    coefficients: &[f64],
    components: &[T],
    observations: &[X],
    parallel: bool,
) -> Array2<f64> {
    let k = components.len();
    let log_pi: Vec<f64> = coefficients.iter().map(|c| c.ln()).collect();
    let row = |x: &X| -> Vec<f64> {
        components
            .iter()
            .zip(log_pi.iter())
            .map(|(c, lp)| lp + c.log_density(x))
            .collect()
    };
    let flat: Vec<f64> = if parallel {
        observations.par_iter().flat_map_iter(row).collect()
    } else {
        observations.iter().flat_map(row).collect()
    };
    Array2::from_shape_vec((observations.len(), k), flat)
        .unwrap_or_else(|_| Array2::from_elem((observations.len(), k), f64::NAN))
}

/// Σ_i w_i · logsumexp_k L_ik.
pub(crate) fn weighted_log_likelihood(log_prob: &Array2<f64>, weights: Option<&[f64]>) -> f64 {
    log_prob
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| {
            let w = weights.map_or(1.0, |w| w[i]);
            if w == 0.0 {
                0.0
            } else {
                w * log_sum_exp(row.iter())
            }
        })
        .sum()
}

/// Row-normalise the log-probability matrix into responsibilities.
fn responsibilities(log_prob: &Array2<f64>, log_domain: bool) -> Array2<f64> {
    let (n, k) = log_prob.dim();
    let mut resp = Array2::zeros((n, k));
    let mut underflowed = 0usize;
    for (i, row) in log_prob.axis_iter(Axis(0)).enumerate() {
        let normalised = if log_domain {
            normalise_log_row(row)
        } else {
            normalise_row(row)
        };
        match normalised {
            Some(values) => resp.row_mut(i).assign(&values),
            None => {
                underflowed += 1;
                resp.row_mut(i).fill(1.0 / k as f64);
            }
        }
    }
    if underflowed > 0 {
        log::warn!(
            "{} of {} observations had zero density under every component; \
             split evenly (log_domain = {})",
            underflowed,
            n,
            log_domain
        );
    }
    resp
}

fn normalise_log_row(row: ArrayView1<f64>) -> Option<ndarray::Array1<f64>> {
    let lse = log_sum_exp(row.iter());
    if !lse.is_finite() {
        return None;
    }
    Some(row.mapv(|v| (v - lse).exp()))
}

fn normalise_row(row: ArrayView1<f64>) -> Option<ndarray::Array1<f64>> {
    let products = row.mapv(f64::exp);
    let sum = products.sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return None;
    }
    Some(products / sum)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Normal, NormalOptions, UnivariateComponent};
    use approx::assert_abs_diff_eq;

    fn two_cluster_data() -> Vec<f64> {
        let mut data = Vec::new();
        for i in 0..50 {
            data.push(-2.0 + (i as f64 - 25.0) * 0.02);
            data.push(3.0 + (i as f64 - 25.0) * 0.03);
        }
        data
    }

    #[test]
    fn test_log_sum_exp() {
        let v = [1000.0, 1000.0];
        assert_abs_diff_eq!(log_sum_exp(v.iter()), 1000.0 + 2.0_f64.ln(), epsilon = 1e-12);
        let empty: [f64; 0] = [];
        assert_eq!(log_sum_exp(empty.iter()), f64::NEG_INFINITY);
        let neg = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_eq!(log_sum_exp(neg.iter()), f64::NEG_INFINITY);
    }

    #[test]
    fn test_em_separates_two_clusters() {
        let data = two_cluster_data();
        let mut pi = vec![0.5, 0.5];
        let mut comps = vec![Normal::new(-1.0, 1.0).unwrap(), Normal::new(1.0, 1.0).unwrap()];
        let result = ExpectationMaximization::new(&mut pi, &mut comps, EmConfig::default())
            .unwrap()
            .fit(&data, None)
            .unwrap();

        assert!(result.converged);
        assert_abs_diff_eq!(pi[0], 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(comps[0].mean(), -2.0, epsilon = 0.05);
        assert_abs_diff_eq!(comps[1].mean(), 3.0, epsilon = 0.05);
        for row in result.responsibilities.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_log_likelihood_is_monotone() {
        let data = two_cluster_data();
        let mut pi = vec![0.9, 0.1];
        let mut comps = vec![Normal::new(0.0, 3.0).unwrap(), Normal::new(0.5, 0.5).unwrap()];
        let config = EmConfig::default().with_tolerance(1e-10);
        let result = ExpectationMaximization::new(&mut pi, &mut comps, config)
            .unwrap()
            .fit(&data, None)
            .unwrap();
        for pair in result.log_likelihood_history.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9, "LL decreased: {} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_log_domain_rejects_weights() {
        let data = two_cluster_data();
        let weights: Vec<f64> = (0..data.len()).map(|i| 1.0 + (i % 2) as f64).collect();
        let mut pi = vec![0.5, 0.5];
        let mut comps = vec![Normal::standard(), Normal::new(1.0, 1.0).unwrap()];
        let mut em = LogExpectationMaximization::new(&mut pi, &mut comps, EmConfig::default()).unwrap();
        let err = em.fit(&data, Some(&weights)).unwrap_err();
        assert!(matches!(err, MixStatsError::InvalidArgument(_)));

        // Uniform weights are accepted
        let uniform = vec![2.0; data.len()];
        assert!(em.fit(&data, Some(&uniform)).is_ok());
    }

    #[test]
    fn test_uniform_weights_scale_log_likelihood() {
        let data = two_cluster_data();
        let start = vec![Normal::new(-1.0, 1.0).unwrap(), Normal::new(1.0, 1.0).unwrap()];
        let config = EmConfig::default().with_max_iterations(15).with_tolerance(0.0);

        let mut pi_a = vec![0.5, 0.5];
        let mut comps_a = start.clone();
        let plain = ExpectationMaximization::new(&mut pi_a, &mut comps_a, config.clone())
            .unwrap()
            .fit(&data, None)
            .unwrap();

        let doubled = vec![2.0; data.len()];
        let mut pi_b = vec![0.5, 0.5];
        let mut comps_b = start;
        let weighted = ExpectationMaximization::new(&mut pi_b, &mut comps_b, config)
            .unwrap()
            .fit(&data, Some(&doubled))
            .unwrap();

        assert_abs_diff_eq!(weighted.log_likelihood, 2.0 * plain.log_likelihood, epsilon = 1e-9);
        assert_eq!(weighted.log_likelihood_history.len(), plain.log_likelihood_history.len());
        for (w, p) in weighted.log_likelihood_history.iter().zip(&plain.log_likelihood_history) {
            assert_abs_diff_eq!(*w, 2.0 * p, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(pi_a[0], pi_b[0], epsilon = 1e-12);
    }

    #[test]
    fn test_nan_observation_rejected_before_iterating() {
        let mut data = two_cluster_data();
        data[3] = f64::NAN;
        let mut pi = vec![0.5, 0.5];
        let mut comps = vec![Normal::new(-1.0, 1.0).unwrap(), Normal::new(1.0, 1.0).unwrap()];
        let mut iterations = 0;
        let result = ExpectationMaximization::new(&mut pi, &mut comps, EmConfig::default())
            .unwrap()
            .on_iteration(|_| iterations += 1)
            .fit(&data, None);
        assert!(matches!(result, Err(MixStatsError::InvalidArgument(_))));
        assert_eq!(iterations, 0);
        assert_eq!(pi, vec![0.5, 0.5]);
        assert_abs_diff_eq!(comps[0].mean(), -1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_log_and_standard_domain_agree() {
        let data = two_cluster_data();
        let start = vec![Normal::new(-1.0, 1.0).unwrap(), Normal::new(1.0, 1.0).unwrap()];
        let config = EmConfig::default().with_max_iterations(20).with_tolerance(0.0);

        let mut pi_a = vec![0.5, 0.5];
        let mut comps_a = start.clone();
        ExpectationMaximization::new(&mut pi_a, &mut comps_a, config.clone())
            .unwrap()
            .fit(&data, None)
            .unwrap();

        let mut pi_b = vec![0.5, 0.5];
        let mut comps_b = start;
        LogExpectationMaximization::new(&mut pi_b, &mut comps_b, config)
            .unwrap()
            .fit(&data, None)
            .unwrap();

        assert_abs_diff_eq!(pi_a[0], pi_b[0], epsilon = 1e-9);
        assert_abs_diff_eq!(comps_a[1].mean(), comps_b[1].mean(), epsilon = 1e-9);
    }

    #[test]
    fn test_weighted_em_matches_duplicated_data() {
        let base = [-2.0, -1.8, -2.2, 3.0, 3.3, 2.7];
        let weights = [2.0, 1.0, 1.0, 1.0, 1.0, 2.0];
        let duplicated = [-2.0, -2.0, -1.8, -2.2, 3.0, 3.3, 2.7, 2.7];
        let config = EmConfig::<NormalOptions>::default()
            .with_max_iterations(10)
            .with_tolerance(0.0)
            .with_parallel(false);

        let mut pi_w = vec![0.5, 0.5];
        let mut comps_w = vec![Normal::new(-1.0, 1.0).unwrap(), Normal::new(1.0, 1.0).unwrap()];
        ExpectationMaximization::new(&mut pi_w, &mut comps_w, config.clone())
            .unwrap()
            .fit(&base, Some(&weights))
            .unwrap();

        let mut pi_d = vec![0.5, 0.5];
        let mut comps_d = vec![Normal::new(-1.0, 1.0).unwrap(), Normal::new(1.0, 1.0).unwrap()];
        ExpectationMaximization::new(&mut pi_d, &mut comps_d, config)
            .unwrap()
            .fit(&duplicated, None)
            .unwrap();

        assert_abs_diff_eq!(pi_w[0], pi_d[0], epsilon = 1e-10);
        assert_abs_diff_eq!(comps_w[0].mean(), comps_d[0].mean(), epsilon = 1e-10);
        assert_abs_diff_eq!(comps_w[1].variance(), comps_d[1].variance(), epsilon = 1e-10);
    }

    #[test]
    fn test_collapsed_component_is_reported_and_state_kept() {
        // The second component starts so far away that it gets no responsibility
        let data = [0.0, 0.1, -0.1, 0.2];
        let mut pi = vec![0.5, 0.5];
        let far = Normal::new(1e6, 1e-3).unwrap();
        let mut comps = vec![Normal::standard(), far.clone()];
        let config = EmConfig::default().with_log_domain(true);
        let err = ExpectationMaximization::new(&mut pi, &mut comps, config)
            .unwrap()
            .fit(&data, None)
            .unwrap_err();
        assert!(matches!(err, MixStatsError::NumericalDegeneracy(_)));
        assert_eq!(pi, vec![0.5, 0.5]);
        assert_eq!(comps[1], far);
    }

    #[test]
    fn test_cancellation_after_first_iteration() {
        let data = two_cluster_data();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let mut pi = vec![0.5, 0.5];
        let mut comps = vec![Normal::new(-0.5, 2.0).unwrap(), Normal::new(0.5, 2.0).unwrap()];
        let config = EmConfig::default().with_tolerance(1e-12).with_cancellation(token);

        let result = ExpectationMaximization::new(&mut pi, &mut comps, config)
            .unwrap()
            .on_iteration(move |report| {
                if report.iteration == 1 {
                    trigger.cancel();
                }
            })
            .fit(&data, None)
            .unwrap();

        assert!(result.cancelled);
        assert!(!result.converged);
        assert_eq!(result.iterations, 1);
        assert!((comps[0].mean() - -0.5).abs() > 1e-6);
    }

    #[test]
    fn test_mismatched_coefficients() {
        let mut pi = vec![1.0];
        let mut comps = vec![Normal::standard(), Normal::standard()];
        assert!(matches!(
            ExpectationMaximization::<f64, Normal>::new(&mut pi, &mut comps, EmConfig::default()),
            Err(MixStatsError::DimensionMismatch(_))
        ));
    }
}
