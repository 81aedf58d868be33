//! Finite mixture of scalar components.

use std::sync::OnceLock;

use ndarray::Array2;
use rand::RngCore;

use super::{argmax, check_finite, check_index, normalize_coefficients, sample_index};
use crate::convergence::IterationReport;
use crate::distributions::{Component, Sampler, UnivariateComponent};
use crate::error::{MixStatsError, Result};
use crate::solvers::em::{
    log_probabilities, log_sum_exp, weighted_log_likelihood, EmConfig, EmResult,
    ExpectationMaximization,
};

/// Mixture of univariate components, p(x) = Σ_k π_k p_k(x).
///
/// # Example
///
/// ```
/// use mixstats_core::distributions::Normal;
/// use mixstats_core::mixture::Mixture;
///
/// let mixture = Mixture::new(
///     vec![Normal::new(2.0, 1.0).unwrap(), Normal::new(5.0, 1.0).unwrap()],
///     vec![0.5, 0.5],
/// )
/// .unwrap();
/// assert!((mixture.mean() - 3.5).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct Mixture<T> {
    coefficients: Vec<f64>,
    components: Vec<T>,
    mean: OnceLock<f64>,
    variance: OnceLock<f64>,
}

impl<T: UnivariateComponent> Mixture<T> {
    /// Build a mixture. Coefficients are normalised if they do not already
    /// sum to one.
    pub fn new(components: Vec<T>, coefficients: Vec<f64>) -> Result<Self> {
        let coefficients = normalize_coefficients(&coefficients, components.len())?;
        Ok(Self {
            coefficients,
            components,
            mean: OnceLock::new(),
            variance: OnceLock::new(),
        })
    }

    /// Build a mixture with π_k = 1/K.
    pub fn with_uniform_coefficients(components: Vec<T>) -> Result<Self> {
        let k = components.len();
        Self::new(components, vec![1.0; k])
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn components(&self) -> &[T] {
        &self.components
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Replace the mixing coefficients.
    pub fn set_coefficients(&mut self, coefficients: Vec<f64>) -> Result<()> {
        self.coefficients = normalize_coefficients(&coefficients, self.components.len())?;
        self.invalidate_moments();
        Ok(())
    }

    fn invalidate_moments(&mut self) {
        self.mean = OnceLock::new();
        self.variance = OnceLock::new();
    }

    // -------------------------------------------------------------------------
    // Densities
    // -------------------------------------------------------------------------

    pub fn density(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .zip(self.components.iter())
            .map(|(pi, c)| pi * c.density(&x))
            .sum()
    }

    /// ln p(x), computed with log-sum-exp so far tails do not underflow.
    pub fn log_density(&self, x: f64) -> f64 {
        let terms: Vec<f64> = self
            .coefficients
            .iter()
            .zip(self.components.iter())
            .map(|(pi, c)| pi.ln() + c.log_density(&x))
            .collect();
        log_sum_exp(terms.iter())
    }

    /// π_k p_k(x): the weighted density contributed by component `k`.
    pub fn component_density(&self, k: usize, x: f64) -> Result<f64> {
        check_index(k, self.components.len())?;
        Ok(self.coefficients[k] * self.components[k].density(&x))
    }

    /// ln π_k + ln p_k(x).
    pub fn component_log_density(&self, k: usize, x: f64) -> Result<f64> {
        check_index(k, self.components.len())?;
        Ok(self.coefficients[k].ln() + self.components[k].log_density(&x))
    }

    /// F(x) = Σ_k π_k F_k(x).
    pub fn cdf(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .zip(self.components.iter())
            .map(|(pi, c)| pi * c.cdf(x))
            .sum()
    }

    // -------------------------------------------------------------------------
    // Moments (cached)
    // -------------------------------------------------------------------------

    pub fn mean(&self) -> f64 {
        *self.mean.get_or_init(|| {
            self.coefficients
                .iter()
                .zip(self.components.iter())
                .map(|(pi, c)| pi * c.mean())
                .sum()
        })
    }

    /// Var[X] = Σ_k π_k (σ²_k + μ²_k) − μ².
    pub fn variance(&self) -> f64 {
        *self.variance.get_or_init(|| {
            let mu = self.mean();
            let second_moment: f64 = self
                .coefficients
                .iter()
                .zip(self.components.iter())
                .map(|(pi, c)| {
                    let m = c.mean();
                    pi * (c.variance() + m * m)
                })
                .sum();
            (second_moment - mu * mu).max(0.0)
        })
    }

    // -------------------------------------------------------------------------
    // Fitting
    // -------------------------------------------------------------------------

    /// Fit coefficients and components by EM.
    ///
    /// The current state is the starting point. On error the mixture is left
    /// exactly as it was.
    pub fn fit(
        &mut self,
        observations: &[f64],
        weights: Option<&[f64]>,
        config: &EmConfig<T::Options>,
    ) -> Result<EmResult> {
        self.fit_with_callback(observations, weights, config, |_| {})
    }

    /// [`Mixture::fit`] with a per-iteration progress callback.
    pub fn fit_with_callback(
        &mut self,
        observations: &[f64],
        weights: Option<&[f64]>,
        config: &EmConfig<T::Options>,
        on_iteration: impl FnMut(&IterationReport),
    ) -> Result<EmResult> {
        check_finite(observations)?;
        let result = ExpectationMaximization::new(
            &mut self.coefficients,
            &mut self.components,
            config.clone(),
        )?
        .on_iteration(on_iteration)
        .fit(observations, weights);
        if result.is_ok() {
            self.invalidate_moments();
        }
        result
    }

    // -------------------------------------------------------------------------
    // Posterior queries
    // -------------------------------------------------------------------------

    /// P(component = k | x) for every k.
    pub fn posterior(&self, x: f64) -> Vec<f64> {
        let log_terms: Vec<f64> = self
            .coefficients
            .iter()
            .zip(self.components.iter())
            .map(|(pi, c)| pi.ln() + c.log_density(&x))
            .collect();
        let norm = log_sum_exp(log_terms.iter());
        if !norm.is_finite() {
            return self.coefficients.clone();
        }
        log_terms.iter().map(|lt| (lt - norm).exp()).collect()
    }

    /// N×K matrix of posterior probabilities.
    pub fn posteriors(&self, observations: &[f64]) -> Array2<f64> {
        let mut out = Array2::zeros((observations.len(), self.components.len()));
        for (i, &x) in observations.iter().enumerate() {
            for (k, p) in self.posterior(x).into_iter().enumerate() {
                out[[i, k]] = p;
            }
        }
        out
    }

    /// Index of the most probable component for `x`.
    pub fn classify(&self, x: f64) -> usize {
        argmax(&self.posterior(x))
    }

    /// Σ_i w_i ln p(x_i).
    pub fn log_likelihood(&self, observations: &[f64], weights: Option<&[f64]>) -> Result<f64> {
        crate::error::check_weights(weights, observations.len())?;
        let log_prob = log_probabilities(&self.coefficients, &self.components, observations, false);
        Ok(weighted_log_likelihood(&log_prob, weights))
    }

    // -------------------------------------------------------------------------
    // Sampling
    // -------------------------------------------------------------------------

    /// One draw by ancestral sampling.
    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<f64> {
        let k = sample_index(&self.coefficients, rng);
        let sampler = self.components[k].as_sampler().ok_or_else(|| {
            MixStatsError::NotSupported(format!("component {} cannot be sampled", k))
        })?;
        Ok(sampler.sample(rng))
    }

    pub fn sample_n(&self, n: usize, rng: &mut dyn RngCore) -> Result<Vec<f64>> {
        self.check_sampleable()?;
        (0..n).map(|_| self.sample(rng)).collect()
    }

    fn check_sampleable(&self) -> Result<()> {
        match self.components.iter().position(|c| c.as_sampler().is_none()) {
            Some(k) => Err(MixStatsError::NotSupported(format!(
                "component {} cannot be sampled",
                k
            ))),
            None => Ok(()),
        }
    }
}

// =============================================================================
// A mixture is itself a component, so mixtures can nest
// =============================================================================

impl<T: UnivariateComponent> Component<f64> for Mixture<T> {
    type Options = EmConfig<T::Options>;

    fn log_density(&self, x: &f64) -> f64 {
        Mixture::log_density(self, *x)
    }

    fn fit_weighted(
        &mut self,
        observations: &[f64],
        weights: Option<&[f64]>,
        options: &EmConfig<T::Options>,
    ) -> Result<()> {
        self.fit(observations, weights, options).map(|_| ())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<f64>> {
        if self.check_sampleable().is_ok() {
            Some(self)
        } else {
            None
        }
    }
}

impl<T: UnivariateComponent> Sampler<f64> for Mixture<T> {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        Mixture::sample(self, rng).unwrap_or(f64::NAN)
    }
}

impl<T: UnivariateComponent> UnivariateComponent for Mixture<T> {
    fn cdf(&self, x: f64) -> f64 {
        Mixture::cdf(self, x)
    }

    fn mean(&self) -> f64 {
        Mixture::mean(self)
    }

    fn variance(&self) -> f64 {
        Mixture::variance(self)
    }
}
