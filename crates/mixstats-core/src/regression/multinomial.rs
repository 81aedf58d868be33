//! Multinomial logistic regression (softmax over M classes).
//!
//! Class 0 is the baseline: its linear predictor is fixed at zero, so only
//! M − 1 rows of coefficients are free. For input row x (with intercept),
//!
//! ```text
//! η_0 = 0,   η_c = β_cᵀ x  (c = 1..M−1)
//! p_c = exp(η_c) / Σ_m exp(η_m)
//! ```

use ndarray::{s, Array1, Array2, Axis};

use super::{check_inputs, check_output_len, design_matrix};
use crate::diagnostics::log_likelihood_multinomial;
use crate::error::{MixStatsError, Result};

#[derive(Debug, Clone)]
pub struct MultinomialLogisticRegression {
    n_inputs: usize,
    n_classes: usize,
    /// (M−1) × (P+1), intercept in column 0.
    coefficients: Array2<f64>,
    standard_errors: Option<Array2<f64>>,
}

impl MultinomialLogisticRegression {
    pub fn new(n_inputs: usize, n_classes: usize) -> Result<Self> {
        if n_classes < 2 {
            return Err(MixStatsError::InvalidArgument(format!(
                "multinomial regression needs at least 2 classes, got {}",
                n_classes
            )));
        }
        Ok(Self {
            n_inputs,
            n_classes,
            coefficients: Array2::zeros((n_classes - 1, n_inputs + 1)),
            standard_errors: None,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    /// Mutable coefficients. Clears any stored standard errors.
    pub fn coefficients_mut(&mut self) -> &mut Array2<f64> {
        self.standard_errors = None;
        &mut self.coefficients
    }

    /// Standard errors from the last fit, same shape as the coefficients.
    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub(crate) fn set_standard_errors(&mut self, standard_errors: Option<Array2<f64>>) {
        self.standard_errors = standard_errors;
    }

    /// N×M matrix of linear predictors, column 0 identically zero.
    pub fn linear_predictors(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        check_inputs(inputs, self.n_inputs)?;
        Ok(self.linear_predictors_design(&design_matrix(inputs)))
    }

    /// Linear predictors from an already-built design matrix.
    pub(crate) fn linear_predictors_design(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut eta = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        eta.slice_mut(s![.., 1..]).assign(&x.dot(&self.coefficients.t()));
        eta
    }

    /// N×M matrix of class probabilities; each row sums to one.
    pub fn probabilities(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(softmax_rows(self.linear_predictors(inputs)?))
    }

    pub(crate) fn probabilities_design(&self, x: &Array2<f64>) -> Array2<f64> {
        softmax_rows(self.linear_predictors_design(x))
    }

    /// Most probable class for every input row.
    pub fn decide(&self, inputs: &Array2<f64>) -> Result<Vec<usize>> {
        let eta = self.linear_predictors(inputs)?;
        Ok(eta
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (c, &v)| if v > best.1 { (c, v) } else { best })
                    .0
            })
            .collect())
    }

    /// Σ_i w_i ln p_{i, class_i}
    pub fn log_likelihood(
        &self,
        inputs: &Array2<f64>,
        classes: &[usize],
        weights: Option<&Array1<f64>>,
    ) -> Result<f64> {
        check_output_len(inputs.nrows(), classes.len())?;
        self.check_classes(classes)?;
        let p = self.probabilities(inputs)?;
        Ok(log_likelihood_multinomial(&p, classes, weights))
    }

    pub(crate) fn check_classes(&self, classes: &[usize]) -> Result<()> {
        if let Some(&bad) = classes.iter().find(|&&c| c >= self.n_classes) {
            return Err(MixStatsError::InvalidArgument(format!(
                "class label {} out of range for {} classes",
                bad, self.n_classes
            )));
        }
        Ok(())
    }
}

/// Row-wise softmax, shifted by the row max for stability.
fn softmax_rows(mut eta: Array2<f64>) -> Array2<f64> {
    for mut row in eta.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    eta
}
