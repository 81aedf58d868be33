//! Generalized linear regression with a canonical link.

use ndarray::{Array1, Array2};

use super::{check_inputs, check_output_len, design_matrix};
use crate::diagnostics;
use crate::error::{MixStatsError, Result};
use crate::links::{Link, LogLink, LogitLink};

/// μ = g⁻¹(β₀ + Σ_j β_j x_j)
///
/// Coefficients are stored intercept first, so `coefficients()[0]` is β₀
/// and `coefficients()[j + 1]` belongs to input column `j`.
#[derive(Debug, Clone)]
pub struct GeneralizedLinearRegression<L> {
    link: L,
    coefficients: Array1<f64>,
    standard_errors: Option<Array1<f64>>,
}

/// Binary (or proportion) response with the logit link.
pub type LogisticRegression = GeneralizedLinearRegression<LogitLink>;

/// Count response with the log link.
pub type PoissonRegression = GeneralizedLinearRegression<LogLink>;

impl<L: Link + Default> GeneralizedLinearRegression<L> {
    /// A model over `n_inputs` input columns with all coefficients zero.
    pub fn new(n_inputs: usize) -> Self {
        Self::with_link(L::default(), n_inputs)
    }
}

impl<L: Link> GeneralizedLinearRegression<L> {
    pub fn with_link(link: L, n_inputs: usize) -> Self {
        Self {
            link,
            coefficients: Array1::zeros(n_inputs + 1),
            standard_errors: None,
        }
    }

    /// Build a model from known coefficients (intercept first).
    pub fn from_coefficients(link: L, coefficients: Array1<f64>) -> Result<Self> {
        if coefficients.is_empty() {
            return Err(MixStatsError::InvalidArgument(
                "coefficients must include at least the intercept".to_string(),
            ));
        }
        Ok(Self {
            link,
            coefficients,
            standard_errors: None,
        })
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Number of input columns (excluding the intercept).
    pub fn n_inputs(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    /// Mutable coefficients. Clears any stored standard errors.
    pub fn coefficients_mut(&mut self) -> &mut Array1<f64> {
        self.standard_errors = None;
        &mut self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Standard errors from the last fit, if they were computed.
    pub fn standard_errors(&self) -> Option<&Array1<f64>> {
        self.standard_errors.as_ref()
    }

    pub(crate) fn set_standard_errors(&mut self, standard_errors: Option<Array1<f64>>) {
        self.standard_errors = standard_errors;
    }

    /// η = Xβ for each input row.
    pub fn linear_predictor(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        check_inputs(inputs, self.n_inputs())?;
        Ok(design_matrix(inputs).dot(&self.coefficients))
    }

    /// Fitted mean μ = g⁻¹(η) for each input row.
    pub fn predict(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.link.inverse(&self.linear_predictor(inputs)?))
    }

    /// exp(β) for every coefficient.
    ///
    /// Under the logit link these are odds ratios (per unit increase of the
    /// input); under the log link they are rate ratios.
    pub fn odds_ratios(&self) -> Array1<f64> {
        self.coefficients.mapv(f64::exp)
    }

    /// Log-likelihood of `outputs` under the link's canonical family.
    pub fn log_likelihood(
        &self,
        inputs: &Array2<f64>,
        outputs: &Array1<f64>,
        weights: Option<&Array1<f64>>,
    ) -> Result<f64> {
        check_output_len(inputs.nrows(), outputs.len())?;
        if let Some(w) = weights {
            check_output_len(inputs.nrows(), w.len())?;
        }
        let mu = self.predict(inputs)?;
        Ok(diagnostics::log_likelihood(self.link.family(), outputs, &mu, weights))
    }

    /// Deviance of `outputs` under the link's canonical family.
    pub fn deviance(
        &self,
        inputs: &Array2<f64>,
        outputs: &Array1<f64>,
        weights: Option<&Array1<f64>>,
    ) -> Result<f64> {
        check_output_len(inputs.nrows(), outputs.len())?;
        let mu = self.predict(inputs)?;
        Ok(diagnostics::deviance(self.link.family(), outputs, &mu, weights))
    }
}
