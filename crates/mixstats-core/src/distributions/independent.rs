//! Joint distribution of independent univariate marginals.
//!
//! log p(x) = Σ_j log p_j(x_j). Fitting fits each marginal on its own
//! column with the same observation weights. Sampling is available only
//! when every marginal can sample.

use ndarray::{Array1, Array2};
use rand::RngCore;

use super::{Component, MultivariateComponent, Sampler, UnivariateComponent};
use crate::error::{MixStatsError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Independent<T> {
    marginals: Vec<T>,
}

impl<T: UnivariateComponent> Independent<T> {
    pub fn new(marginals: Vec<T>) -> Result<Self> {
        if marginals.is_empty() {
            return Err(MixStatsError::InvalidArgument(
                "Independent needs at least one marginal".to_string(),
            ));
        }
        Ok(Self { marginals })
    }

    pub fn marginals(&self) -> &[T] {
        &self.marginals
    }
}

impl<T: UnivariateComponent> Component<Array1<f64>> for Independent<T> {
    type Options = T::Options;

    fn log_density(&self, x: &Array1<f64>) -> f64 {
        if x.len() != self.marginals.len() {
            return f64::NAN;
        }
        self.marginals
            .iter()
            .zip(x.iter())
            .map(|(m, xj)| m.log_density(xj))
            .sum()
    }

    fn fit_weighted(
        &mut self,
        observations: &[Array1<f64>],
        weights: Option<&[f64]>,
        options: &T::Options,
    ) -> Result<()> {
        let d = self.marginals.len();
        if let Some(bad) = observations.iter().find(|x| x.len() != d) {
            return Err(MixStatsError::DimensionMismatch(format!(
                "expected observations of dimension {}, found {}",
                d,
                bad.len()
            )));
        }

        // Fit into copies so a failing marginal leaves the joint unchanged
        let mut fitted = self.marginals.clone();
        for (j, marginal) in fitted.iter_mut().enumerate() {
            let column: Vec<f64> = observations.iter().map(|x| x[j]).collect();
            marginal.fit_weighted(&column, weights, options)?;
        }
        self.marginals = fitted;
        Ok(())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<Array1<f64>>> {
        if self.marginals.iter().all(|m| m.as_sampler().is_some()) {
            Some(self)
        } else {
            None
        }
    }
}

impl<T: UnivariateComponent> Sampler<Array1<f64>> for Independent<T> {
    fn sample(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        self.marginals
            .iter()
            .map(|m| m.as_sampler().map_or(f64::NAN, |s| s.sample(rng)))
            .collect()
    }
}

impl<T: UnivariateComponent> MultivariateComponent for Independent<T> {
    fn dimension(&self) -> usize {
        self.marginals.len()
    }

    fn mean(&self) -> Array1<f64> {
        self.marginals.iter().map(|m| m.mean()).collect()
    }

    fn covariance(&self) -> Array2<f64> {
        let diag: Array1<f64> = self.marginals.iter().map(|m| m.variance()).collect();
        Array2::from_diag(&diag)
    }
}
