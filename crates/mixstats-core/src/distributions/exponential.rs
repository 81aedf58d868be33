//! Exponential component with rate parameterisation.

use rand::RngCore;
use rand_distr::{Distribution, Exp};

use super::{prepare_fit, weighted_mean, Component, Sampler, UnivariateComponent};
use crate::error::{MixStatsError, Result};

/// Exponential distribution with density `rate · exp(-rate · x)` on x ≥ 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Exponential {
    rate: f64,
}

impl Exponential {
    pub fn new(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(MixStatsError::InvalidArgument(format!(
                "Exponential requires a positive finite rate, got {}",
                rate
            )));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Component<f64> for Exponential {
    type Options = ();

    fn log_density(&self, x: &f64) -> f64 {
        if *x < 0.0 {
            return f64::NEG_INFINITY;
        }
        self.rate.ln() - self.rate * x
    }

    fn fit_weighted(&mut self, observations: &[f64], weights: Option<&[f64]>, _options: &()) -> Result<()> {
        if let Some(bad) = observations.iter().find(|&&x| x < 0.0) {
            return Err(MixStatsError::InvalidArgument(format!(
                "Exponential observations must be non-negative, found {}",
                bad
            )));
        }
        let total = prepare_fit(observations, weights)?;
        let rate = 1.0 / weighted_mean(observations, weights, total);
        if !rate.is_finite() || rate <= 0.0 {
            return Err(MixStatsError::NumericalDegeneracy(format!(
                "Exponential fit collapsed (rate = {})",
                rate
            )));
        }
        self.rate = rate;
        Ok(())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<f64>> {
        Some(self)
    }
}

impl Sampler<f64> for Exponential {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match Exp::new(self.rate) {
            Ok(exp) => exp.sample(rng),
            Err(_) => f64::NAN,
        }
    }
}

impl UnivariateComponent for Exponential {
    fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            0.0
        } else {
            -(-self.rate * x).exp_m1()
        }
    }

    fn mean(&self) -> f64 {
        1.0 / self.rate
    }

    fn variance(&self) -> f64 {
        1.0 / (self.rate * self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_log_density_and_support() {
        let e = Exponential::new(2.0).unwrap();
        assert_abs_diff_eq!(e.log_density(&0.5), 2.0_f64.ln() - 1.0, epsilon = 1e-12);
        assert_eq!(e.log_density(&-1.0), f64::NEG_INFINITY);
        assert_eq!(e.density(&-1.0), 0.0);
    }

    #[test]
    fn test_weighted_fit() {
        let mut e = Exponential::new(1.0).unwrap();
        e.fit_weighted(&[1.0, 3.0], Some(&[3.0, 1.0]), &()).unwrap();
        // weighted mean = 6/4 = 1.5
        assert_abs_diff_eq!(e.rate(), 1.0 / 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_all_zero_observations_collapses() {
        let mut e = Exponential::new(1.0).unwrap();
        assert!(matches!(
            e.fit(&[0.0, 0.0]),
            Err(MixStatsError::NumericalDegeneracy(_))
        ));
        assert_eq!(e.rate(), 1.0);
    }

    #[test]
    fn test_cdf() {
        let e = Exponential::new(0.5).unwrap();
        assert_abs_diff_eq!(e.cdf(2.0), 1.0 - (-1.0_f64).exp(), epsilon = 1e-12);
        assert_eq!(e.cdf(-3.0), 0.0);
    }
}
