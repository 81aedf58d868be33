//! Univariate normal (Gaussian) component.

use std::f64::consts::{PI, SQRT_2};

use rand::RngCore;
use rand_distr::Distribution;
use statrs::function::erf::erfc;

use super::{prepare_fit, weighted_mean, weighted_variance, Component, Sampler, UnivariateComponent};
use crate::error::{MixStatsError, Result};

/// Fitting options for [`Normal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalOptions {
    /// Added to the estimated variance. Keeps a component that captured a
    /// single point from collapsing to zero width.
    pub regularization: f64,
}

impl NormalOptions {
    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }
}

/// Normal distribution N(mean, std_dev²).
#[derive(Debug, Clone, PartialEq)]
pub struct Normal {
    mean: f64,
    std_dev: f64,
}

impl Normal {
    pub fn new(mean: f64, std_dev: f64) -> Result<Self> {
        if !mean.is_finite() || !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(MixStatsError::InvalidArgument(format!(
                "Normal requires a finite mean and positive std_dev, got ({}, {})",
                mean, std_dev
            )));
        }
        Ok(Self { mean, std_dev })
    }

    /// The standard normal N(0, 1).
    pub fn standard() -> Self {
        Self { mean: 0.0, std_dev: 1.0 }
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

impl Component<f64> for Normal {
    type Options = NormalOptions;

    fn log_density(&self, x: &f64) -> f64 {
        let z = (x - self.mean) / self.std_dev;
        -0.5 * z * z - self.std_dev.ln() - 0.5 * (2.0 * PI).ln()
    }

    fn fit_weighted(
        &mut self,
        observations: &[f64],
        weights: Option<&[f64]>,
        options: &NormalOptions,
    ) -> Result<()> {
        let total = prepare_fit(observations, weights)?;
        let mean = weighted_mean(observations, weights, total);
        let variance = weighted_variance(observations, weights, mean, total) + options.regularization;

        if !mean.is_finite() || !variance.is_finite() || variance <= 0.0 {
            return Err(MixStatsError::NumericalDegeneracy(format!(
                "Normal fit collapsed (mean = {}, variance = {})",
                mean, variance
            )));
        }

        self.mean = mean;
        self.std_dev = variance.sqrt();
        Ok(())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<f64>> {
        Some(self)
    }
}

impl Sampler<f64> for Normal {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let z: f64 = rand_distr::StandardNormal.sample(rng);
        self.mean + self.std_dev * z
    }
}

impl UnivariateComponent for Normal {
    fn cdf(&self, x: f64) -> f64 {
        0.5 * erfc(-(x - self.mean) / (self.std_dev * SQRT_2))
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn variance(&self) -> f64 {
        self.std_dev * self.std_dev
    }
}
