//! Multivariate normal component with full covariance.
//!
//! The Cholesky factor and log-determinant are computed once whenever the
//! covariance changes, so each density evaluation is a single triangular
//! solve: O(d²).

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Axis};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use super::{prepare_fit, weight_at, Component, MultivariateComponent, Sampler};
use crate::error::{MixStatsError, Result};
use crate::linalg::{cholesky_factor, forward_substitute};

/// Fitting options for [`MultivariateNormal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultivariateNormalOptions {
    /// Ridge added to the diagonal of the estimated covariance.
    pub regularization: f64,
    /// Estimate only the diagonal (independent coordinates).
    pub diagonal: bool,
}

impl MultivariateNormalOptions {
    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn with_diagonal(mut self, diagonal: bool) -> Self {
        self.diagonal = diagonal;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateNormal {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    chol_lower: Array2<f64>,
    log_det: f64,
}

impl MultivariateNormal {
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let d = mean.len();
        if d == 0 {
            return Err(MixStatsError::InvalidArgument(
                "MultivariateNormal needs at least one dimension".to_string(),
            ));
        }
        if covariance.dim() != (d, d) {
            return Err(MixStatsError::DimensionMismatch(format!(
                "mean has {} elements but covariance is {}x{}",
                d,
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        let (chol_lower, log_det) = cholesky_factor(&covariance).ok_or_else(|| {
            MixStatsError::InvalidArgument("covariance must be symmetric positive definite".to_string())
        })?;
        Ok(Self { mean, covariance, chol_lower, log_det })
    }

    /// N(0, I) in `d` dimensions.
    pub fn standard(d: usize) -> Result<Self> {
        Self::new(Array1::zeros(d), Array2::eye(d))
    }

    /// Squared Mahalanobis distance of `x` from the mean.
    pub fn mahalanobis_squared(&self, x: &Array1<f64>) -> f64 {
        let diff: Vec<f64> = x.iter().zip(self.mean.iter()).map(|(a, b)| a - b).collect();
        forward_substitute(&self.chol_lower, &diff).iter().map(|v| v * v).sum()
    }
}

impl Component<Array1<f64>> for MultivariateNormal {
    type Options = MultivariateNormalOptions;

    fn log_density(&self, x: &Array1<f64>) -> f64 {
        let d = self.mean.len();
        if x.len() != d {
            return f64::NAN;
        }
        -0.5 * (d as f64 * (2.0 * PI).ln() + self.log_det + self.mahalanobis_squared(x))
    }

    fn fit_weighted(
        &mut self,
        observations: &[Array1<f64>],
        weights: Option<&[f64]>,
        options: &MultivariateNormalOptions,
    ) -> Result<()> {
        let total = prepare_fit(observations, weights)?;
        let d = self.mean.len();
        if let Some(bad) = observations.iter().find(|x| x.len() != d) {
            return Err(MixStatsError::DimensionMismatch(format!(
                "expected observations of dimension {}, found {}",
                d,
                bad.len()
            )));
        }

        let mut mean = Array1::<f64>::zeros(d);
        for (i, x) in observations.iter().enumerate() {
            mean.scaled_add(weight_at(weights, i), x);
        }
        mean /= total;

        let mut covariance = Array2::<f64>::zeros((d, d));
        for (i, x) in observations.iter().enumerate() {
            let w = weight_at(weights, i);
            if w == 0.0 {
                continue;
            }
            let diff = x - &mean;
            let col = diff.view().insert_axis(Axis(1));
            let row = diff.view().insert_axis(Axis(0));
            covariance.scaled_add(w, &col.dot(&row));
        }
        covariance /= total;

        if options.diagonal {
            let diag = covariance.diag().to_owned();
            covariance = Array2::from_diag(&diag);
        }
        for j in 0..d {
            covariance[[j, j]] += options.regularization;
        }

        let (chol_lower, log_det) = cholesky_factor(&covariance).ok_or_else(|| {
            MixStatsError::NumericalDegeneracy(
                "estimated covariance is not positive definite; consider regularization".to_string(),
            )
        })?;
        if !mean.iter().all(|v| v.is_finite()) || !log_det.is_finite() {
            return Err(MixStatsError::NumericalDegeneracy(
                "MultivariateNormal fit produced non-finite parameters".to_string(),
            ));
        }

        self.mean = mean;
        self.covariance = covariance;
        self.chol_lower = chol_lower;
        self.log_det = log_det;
        Ok(())
    }

    fn as_sampler(&self) -> Option<&dyn Sampler<Array1<f64>>> {
        Some(self)
    }
}

impl Sampler<Array1<f64>> for MultivariateNormal {
    /// μ + L·z with z ~ N(0, I).
    fn sample(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let d = self.mean.len();
        let z: Array1<f64> = (0..d).map(|_| StandardNormal.sample(rng)).collect();
        &self.mean + &self.chol_lower.dot(&z)
    }
}

impl MultivariateComponent for MultivariateNormal {
    fn dimension(&self) -> usize {
        self.mean.len()
    }

    fn mean(&self) -> Array1<f64> {
        self.mean.clone()
    }

    fn covariance(&self) -> Array2<f64> {
        self.covariance.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_standard_density_at_origin() {
        let mvn = MultivariateNormal::standard(2).unwrap();
        assert_abs_diff_eq!(mvn.density(&array![0.0, 0.0]), 1.0 / (2.0 * PI), epsilon = 1e-12);
    }

    #[test]
    fn test_density_matches_product_of_normals_when_diagonal() {
        use crate::distributions::Normal;
        let mvn = MultivariateNormal::new(array![1.0, -2.0], array![[4.0, 0.0], [0.0, 0.25]]).unwrap();
        let a = Normal::new(1.0, 2.0).unwrap();
        let b = Normal::new(-2.0, 0.5).unwrap();
        let x = array![0.3, -1.7];
        assert_abs_diff_eq!(
            mvn.log_density(&x),
            a.log_density(&0.3) + b.log_density(&-1.7),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_weighted_fit_recovers_correlation() {
        let mut rng = StdRng::seed_from_u64(11);
        let truth = MultivariateNormal::new(array![2.0, 5.0], array![[1.0, 0.6], [0.6, 2.0]]).unwrap();
        let data: Vec<Array1<f64>> = (0..20_000).map(|_| truth.sample(&mut rng)).collect();

        let mut fitted = MultivariateNormal::standard(2).unwrap();
        fitted.fit(&data).unwrap();
        assert_abs_diff_eq!(fitted.mean[0], 2.0, epsilon = 0.05);
        assert_abs_diff_eq!(fitted.mean[1], 5.0, epsilon = 0.05);
        assert_abs_diff_eq!(fitted.covariance[[0, 1]], 0.6, epsilon = 0.06);
        assert_abs_diff_eq!(fitted.covariance[[1, 1]], 2.0, epsilon = 0.1);
    }

    #[test]
    fn test_degenerate_fit_and_regularization() {
        let data = vec![array![2.0, 1.0], array![2.0, 1.0], array![2.0, 1.0]];
        let mut mvn = MultivariateNormal::standard(2).unwrap();
        assert!(matches!(mvn.fit(&data), Err(MixStatsError::NumericalDegeneracy(_))));

        let opts = MultivariateNormalOptions::default().with_regularization(1e-3);
        mvn.fit_weighted(&data, None, &opts).unwrap();
        assert_abs_diff_eq!(mvn.mean[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_diagonal_option_drops_correlation() {
        let data = vec![array![0.0, 0.0], array![1.0, 2.0], array![2.0, 4.1]];
        let mut mvn = MultivariateNormal::standard(2).unwrap();
        let opts = MultivariateNormalOptions::default().with_diagonal(true);
        mvn.fit_weighted(&data, None, &opts).unwrap();
        assert_eq!(mvn.covariance()[[0, 1]], 0.0);
    }

    #[test]
    fn test_wrong_dimension() {
        let mvn = MultivariateNormal::standard(2).unwrap();
        assert!(mvn.log_density(&array![1.0]).is_nan());
        assert!(MultivariateNormal::new(array![0.0], Array2::eye(2)).is_err());
    }
}
