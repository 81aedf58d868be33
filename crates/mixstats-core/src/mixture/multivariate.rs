//! Finite mixture of vector-valued components.

use std::sync::OnceLock;

use ndarray::{Array1, Array2, Axis};
use rand::RngCore;

use super::{argmax, check_finite, check_index, normalize_coefficients, sample_index};
use crate::convergence::IterationReport;
use crate::distributions::{Component, MultivariateComponent, Sampler};
use crate::error::{MixStatsError, Result};
use crate::solvers::em::{
    log_probabilities, log_sum_exp, weighted_log_likelihood, EmConfig, EmResult,
    ExpectationMaximization,
};

/// Mixture of multivariate components sharing one dimension.
#[derive(Debug, Clone)]
pub struct MultivariateMixture<T> {
    coefficients: Vec<f64>,
    components: Vec<T>,
    dimension: usize,
    mean: OnceLock<Array1<f64>>,
    covariance: OnceLock<Array2<f64>>,
}

impl<T: MultivariateComponent> MultivariateMixture<T> {
    /// Build a mixture. Every component must have the same dimension; coefficients
    /// are normalised.
    pub fn new(components: Vec<T>, coefficients: Vec<f64>) -> Result<Self> {
        let coefficients = normalize_coefficients(&coefficients, components.len())?;
        let dimension = components[0].dimension();
        if let Some(bad) = components.iter().find(|c| c.dimension() != dimension) {
            return Err(MixStatsError::DimensionMismatch(format!(
                "components have dimensions {} and {}",
                dimension,
                bad.dimension()
            )));
        }
        Ok(Self {
            coefficients,
            components,
            dimension,
            mean: OnceLock::new(),
            covariance: OnceLock::new(),
        })
    }

    /// Build a mixture with equal coefficients 1/K.
    pub fn with_uniform_coefficients(components: Vec<T>) -> Result<Self> {
        let k = components.len();
        Self::new(components, vec![1.0; k])
    }

    /// Mixing coefficients π, summing to one.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn components(&self) -> &[T] {
        &self.components
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Dimension shared by every component.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Replace the coefficients, normalising them and clearing cached moments.
    pub fn set_coefficients(&mut self, coefficients: Vec<f64>) -> Result<()> {
        self.coefficients = normalize_coefficients(&coefficients, self.components.len())?;
        self.invalidate_moments();
        Ok(())
    }

    fn invalidate_moments(&mut self) {
        self.mean = OnceLock::new();
        self.covariance = OnceLock::new();
    }

    // -------------------------------------------------------------------------
    // Densities
    // -------------------------------------------------------------------------

    /// p(x). NaN if `x` has the wrong dimension.
    pub fn density(&self, x: &Array1<f64>) -> f64 {
        self.log_density(x).exp()
    }

    /// ln p(x) by log-sum-exp. NaN when `x` has the wrong dimension.
    pub fn log_density(&self, x: &Array1<f64>) -> f64 {
        if x.len() != self.dimension {
            return f64::NAN;
        }
        let terms: Vec<f64> = self
            .coefficients
            .iter()
            .zip(self.components.iter())
            .map(|(pi, c)| pi.ln() + c.log_density(x))
            .collect();
        log_sum_exp(terms.iter())
    }

    /// Weighted density π_k p_k(x) of component `k`.
    pub fn component_density(&self, k: usize, x: &Array1<f64>) -> Result<f64> {
        Ok(self.component_log_density(k, x)?.exp())
    }

    pub fn component_log_density(&self, k: usize, x: &Array1<f64>) -> Result<f64> {
        check_index(k, self.components.len())?;
        self.check_point(x)?;
        Ok(self.coefficients[k].ln() + self.components[k].log_density(x))
    }

    /// Multivariate mixture CDFs have no closed form; always `NotSupported`.
    pub fn cdf(&self, _x: &Array1<f64>) -> Result<f64> {
        Err(MixStatsError::NotSupported(
            "the CDF of a multivariate mixture is not available".to_string(),
        ))
    }

    // -------------------------------------------------------------------------
    // Moments (cached)
    // -------------------------------------------------------------------------

    /// Σ_k π_k μ_k, cached until the next fit.
    pub fn mean(&self) -> Array1<f64> {
        self.mean
            .get_or_init(|| {
                let mut mean = Array1::zeros(self.dimension);
                for (pi, c) in self.coefficients.iter().zip(self.components.iter()) {
                    mean.scaled_add(*pi, &c.mean());
                }
                mean
            })
            .clone()
    }

    /// Σ = Σ_k π_k (Σ_k + μ_k μ_kᵀ) − μ μᵀ.
    pub fn covariance(&self) -> Array2<f64> {
        self.covariance
            .get_or_init(|| {
                let mu = self.mean();
                let d = self.dimension;
                let mut second = Array2::<f64>::zeros((d, d));
                for (pi, c) in self.coefficients.iter().zip(self.components.iter()) {
                    let m = c.mean();
                    second.scaled_add(*pi, &c.covariance());
                    second.scaled_add(*pi, &outer(&m, &m));
                }
                second - outer(&mu, &mu)
            })
            .clone()
    }

    /// Diagonal of the covariance.
    pub fn variance(&self) -> Array1<f64> {
        self.covariance().diag().to_owned()
    }

    // -------------------------------------------------------------------------
    // Fitting
    // -------------------------------------------------------------------------

    /// Fit by EM on the rows of `observations` (N×d).
    pub fn fit(
        &mut self,
        observations: &Array2<f64>,
        weights: Option<&[f64]>,
        config: &EmConfig<T::Options>,
    ) -> Result<EmResult> {
        self.fit_with_callback(observations, weights, config, |_| {})
    }

    /// [`MultivariateMixture::fit`] with a per-iteration progress callback.
    pub fn fit_with_callback(
        &mut self,
        observations: &Array2<f64>,
        weights: Option<&[f64]>,
        config: &EmConfig<T::Options>,
        on_iteration: impl FnMut(&IterationReport),
    ) -> Result<EmResult> {
        let rows = self.rows_of(observations)?;
        let result = ExpectationMaximization::new(
            &mut self.coefficients,
            &mut self.components,
            config.clone(),
        )?
        .on_iteration(on_iteration)
        .fit(&rows, weights);
        if result.is_ok() {
            self.invalidate_moments();
        }
        result
    }

    // -------------------------------------------------------------------------
    // Posterior queries
    // -------------------------------------------------------------------------

    /// P(component = k | x) for every k.
    pub fn posterior(&self, x: &Array1<f64>) -> Result<Vec<f64>> {
        self.check_point(x)?;
        let log_terms: Vec<f64> = self
            .coefficients
            .iter()
            .zip(self.components.iter())
            .map(|(pi, c)| pi.ln() + c.log_density(x))
            .collect();
        let norm = log_sum_exp(log_terms.iter());
        if !norm.is_finite() {
            return Ok(self.coefficients.clone());
        }
        Ok(log_terms.iter().map(|lt| (lt - norm).exp()).collect())
    }

    /// Posterior rows for every observation (N×K).
    pub fn posteriors(&self, observations: &Array2<f64>) -> Result<Array2<f64>> {
        let rows = self.rows_of(observations)?;
        let mut out = Array2::zeros((rows.len(), self.components.len()));
        for (i, x) in rows.iter().enumerate() {
            for (k, p) in self.posterior(x)?.into_iter().enumerate() {
                out[[i, k]] = p;
            }
        }
        Ok(out)
    }

    /// Index of the most probable component for `x`.
    pub fn classify(&self, x: &Array1<f64>) -> Result<usize> {
        Ok(argmax(&self.posterior(x)?))
    }

    /// Σ_i w_i ln p(x_i).
    pub fn log_likelihood(&self, observations: &Array2<f64>, weights: Option<&[f64]>) -> Result<f64> {
        let rows = self.rows_of(observations)?;
        crate::error::check_weights(weights, rows.len())?;
        let log_prob = log_probabilities(&self.coefficients, &self.components, &rows, false);
        Ok(weighted_log_likelihood(&log_prob, weights))
    }

    // -------------------------------------------------------------------------
    // Sampling
    // -------------------------------------------------------------------------

    /// Draw a component by its coefficient, then a point from it.
    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<Array1<f64>> {
        let k = sample_index(&self.coefficients, rng);
        let sampler = self.components[k].as_sampler().ok_or_else(|| {
            MixStatsError::NotSupported(format!("component {} cannot be sampled", k))
        })?;
        Ok(sampler.sample(rng))
    }

    /// `n` draws as the rows of an n×d matrix.
    pub fn sample_n(&self, n: usize, rng: &mut dyn RngCore) -> Result<Array2<f64>> {
        self.check_sampleable()?;
        let mut out = Array2::zeros((n, self.dimension));
        for mut row in out.axis_iter_mut(Axis(0)) {
            row.assign(&self.sample(rng)?);
        }
        Ok(out)
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

    fn check_point(&self, x: &Array1<f64>) -> Result<()> {
        if x.len() != self.dimension {
            return Err(MixStatsError::DimensionMismatch(format!(
                "expected a point of dimension {}, found {}",
                self.dimension,
                x.len()
            )));
        }
        Ok(())
    }

    fn rows_of(&self, observations: &Array2<f64>) -> Result<Vec<Array1<f64>>> {
        if observations.ncols() != self.dimension {
            return Err(MixStatsError::DimensionMismatch(format!(
                "observations have {} columns, mixture has dimension {}",
                observations.ncols(),
                self.dimension
            )));
        }
        check_finite(observations.iter())?;
        Ok(observations.axis_iter(Axis(0)).map(|r| r.to_owned()).collect())
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

impl<T: MultivariateComponent> Component<Array1<f64>> for MultivariateMixture<T> {
    type Options = EmConfig<T::Options>;

    fn log_density(&self, x: &Array1<f64>) -> f64 {
        MultivariateMixture::log_density(self, x)
    }

    fn fit_weighted(
        &mut self,
        observations: &[Array1<f64>],
        weights: Option<&[f64]>,
        options: &EmConfig<T::Options>,
    ) -> Result<()> {
        if let Some(bad) = observations.iter().find(|x| x.len() != self.dimension) {
            return Err(MixStatsError::DimensionMismatch(format!(
                "expected observations of dimension {}, found {}",
                self.dimension,
                bad.len()
            )));
        }
        ExpectationMaximization::new(&mut self.coefficients, &mut self.components, options.clone())?
            .fit(observations, weights)?;
        self.invalidate_moments();
        Ok(())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<Array1<f64>>> {
        if self.check_sampleable().is_ok() {
            Some(self)
        } else {
            None
        }
    }
}

impl<T: MultivariateComponent> Sampler<Array1<f64>> for MultivariateMixture<T> {
    fn sample(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        MultivariateMixture::sample(self, rng)
            .unwrap_or_else(|_| Array1::from_elem(self.dimension, f64::NAN))
    }
}

impl<T: MultivariateComponent> MultivariateComponent for MultivariateMixture<T> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn mean(&self) -> Array1<f64> {
        MultivariateMixture::mean(self)
    }

    fn covariance(&self) -> Array2<f64> {
        MultivariateMixture::covariance(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Independent, MultivariateNormal, Normal};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_blobs() -> MultivariateMixture<MultivariateNormal> {
        MultivariateMixture::new(
            vec![
                MultivariateNormal::new(array![0.0, 0.0], Array2::eye(2)).unwrap(),
                MultivariateNormal::new(array![4.0, 4.0], Array2::eye(2)).unwrap(),
            ],
            vec![0.5, 0.5],
        )
        .unwrap()
    }

    #[test]
    fn test_dimension_checks() {
        let a = MultivariateNormal::standard(2).unwrap();
        let b = MultivariateNormal::standard(3).unwrap();
        assert!(MultivariateMixture::new(vec![a, b], vec![0.5, 0.5]).is_err());
        let m = two_blobs();
        assert!(m.log_density(&array![1.0]).is_nan());
        assert!(m.posterior(&array![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_cdf_not_supported() {
        let m = two_blobs();
        assert!(matches!(m.cdf(&array![0.0, 0.0]), Err(MixStatsError::NotSupported(_))));
    }

    #[test]
    fn test_moments() {
        let m = two_blobs();
        let mean = m.mean();
        assert_abs_diff_eq!(mean[0], 2.0, epsilon = 1e-12);
        let cov = m.covariance();
        // 1 (within) + 4 (between)
        assert_abs_diff_eq!(cov[[0, 0]], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.variance()[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_recovers_blobs() {
        let truth = two_blobs();
        let mut rng = StdRng::seed_from_u64(21);
        let data = truth.sample_n(600, &mut rng).unwrap();

        let mut m = MultivariateMixture::new(
            vec![
                MultivariateNormal::new(array![1.0, -1.0], Array2::eye(2)).unwrap(),
                MultivariateNormal::new(array![3.0, 5.0], Array2::eye(2)).unwrap(),
            ],
            vec![0.5, 0.5],
        )
        .unwrap();
        let result = m.fit(&data, None, &EmConfig::default()).unwrap();
        assert!(result.converged);
        let first = m.components()[0].mean();
        let second = m.components()[1].mean();
        assert_abs_diff_eq!(first[0], 0.0, epsilon = 0.25);
        assert_abs_diff_eq!(second[1], 4.0, epsilon = 0.25);
        assert_eq!(m.classify(&array![4.2, 3.9]).unwrap(), 1);
    }

    #[test]
    fn test_fit_rejects_wrong_columns() {
        let mut m = two_blobs();
        let data = Array2::zeros((5, 3));
        assert!(matches!(
            m.fit(&data, None, &EmConfig::default()),
            Err(MixStatsError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_independent_components() {
        let m = MultivariateMixture::with_uniform_coefficients(vec![
            Independent::new(vec![Normal::standard(), Normal::standard()]).unwrap(),
            Independent::new(vec![Normal::new(3.0, 1.0).unwrap(), Normal::standard()]).unwrap(),
        ])
        .unwrap();
        let post = m.posterior(&array![3.0, 0.0]).unwrap();
        assert!(post[1] > post[0]);
        let x = array![0.5, -0.5];
        let total = m.component_density(0, &x).unwrap() + m.component_density(1, &x).unwrap();
        assert_abs_diff_eq!(total, m.density(&x), epsilon = 1e-14);
    }
}
