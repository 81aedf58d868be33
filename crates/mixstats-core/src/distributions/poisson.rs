//! Poisson component (discrete, observations stored as `f64` counts).

use rand::RngCore;
use rand_distr::Distribution;
use statrs::function::gamma::{gamma_ur, ln_gamma};

use super::{prepare_fit, weighted_mean, Component, Sampler, UnivariateComponent};
use crate::error::{MixStatsError, Result};

/// Poisson distribution with mean `lambda`.
///
/// `log_density` is the log mass; non-integer or negative points have
/// zero mass.
#[derive(Debug, Clone, PartialEq)]
pub struct Poisson {
    lambda: f64,
}

impl Poisson {
    pub fn new(lambda: f64) -> Result<Self> {
        if !lambda.is_finite() || lambda <= 0.0 {
            return Err(MixStatsError::InvalidArgument(format!(
                "Poisson requires a positive finite lambda, got {}",
                lambda
            )));
        }
        Ok(Self { lambda })
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

fn is_count(x: f64) -> bool {
    x >= 0.0 && x.fract() == 0.0
}

impl Component<f64> for Poisson {
    type Options = ();

    fn log_density(&self, x: &f64) -> f64 {
        if !is_count(*x) {
            return f64::NEG_INFINITY;
        }
        x * self.lambda.ln() - self.lambda - ln_gamma(x + 1.0)
    }

    fn fit_weighted(&mut self, observations: &[f64], weights: Option<&[f64]>, _options: &()) -> Result<()> {
        if let Some(bad) = observations.iter().find(|&&x| !is_count(x)) {
            return Err(MixStatsError::InvalidArgument(format!(
                "Poisson observations must be non-negative integers, found {}",
                bad
            )));
        }
        let total = prepare_fit(observations, weights)?;
        let lambda = weighted_mean(observations, weights, total);
        if !lambda.is_finite() || lambda <= 0.0 {
            return Err(MixStatsError::NumericalDegeneracy(format!(
                "Poisson fit collapsed (lambda = {})",
                lambda
            )));
        }
        self.lambda = lambda;
        Ok(())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<f64>> {
        Some(self)
    }
}

impl Sampler<f64> for Poisson {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match rand_distr::Poisson::new(self.lambda) {
            Ok(p) => p.sample(rng),
            Err(_) => f64::NAN,
        }
    }
}

impl UnivariateComponent for Poisson {
    /// P(X ≤ x) = Q(⌊x⌋ + 1, λ), the regularised upper incomplete gamma.
    fn cdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 0.0;
        }
        gamma_ur(x.floor() + 1.0, self.lambda)
    }

    fn mean(&self) -> f64 {
        self.lambda
    }

    fn variance(&self) -> f64 {
        self.lambda
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_mass() {
        let p = Poisson::new(3.0).unwrap();
        // P(X = 2) = 9/2 · e^-3
        assert_abs_diff_eq!(p.density(&2.0), 4.5 * (-3.0_f64).exp(), epsilon = 1e-12);
        assert_eq!(p.density(&1.5), 0.0);
        assert_eq!(p.density(&-1.0), 0.0);
    }

    #[test]
    fn test_cdf_matches_sum_of_masses() {
        let p = Poisson::new(2.5).unwrap();
        let manual: f64 = (0..=4).map(|k| p.density(&(k as f64))).sum();
        assert_abs_diff_eq!(p.cdf(4.0), manual, epsilon = 1e-10);
        assert_abs_diff_eq!(p.cdf(4.7), manual, epsilon = 1e-10);
    }

    #[test]
    fn test_fit_rejects_non_counts() {
        let mut p = Poisson::new(1.0).unwrap();
        assert!(matches!(p.fit(&[1.0, 2.5]), Err(MixStatsError::InvalidArgument(_))));
        p.fit(&[1.0, 2.0, 6.0]).unwrap();
        assert_abs_diff_eq!(p.lambda(), 3.0, epsilon = 1e-12);
    }
}
