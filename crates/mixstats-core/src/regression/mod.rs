// =============================================================================
// Regression Models
// =============================================================================
//
// Models hold coefficients and know how to predict. Fitting lives in the
// solvers (`solvers::irls`, `solvers::lower_bound`), which borrow a model
// mutably and write the coefficients back.
//
//   - GeneralizedLinearRegression<L>:  μ = g⁻¹(β₀ + Σ_j β_j x_j)
//   - LogisticRegression:              the logit-link alias
//   - MultinomialLogisticRegression:   softmax over M classes, class 0 baseline
//
// DESIGN MATRIX
// -------------
// Every model works on an N×(P+1) design matrix with the intercept column
// FIRST:
//
//     [ 1  x₁₁  x₁₂ ... x₁ₚ ]
//     [ 1  x₂₁  x₂₂ ... x₂ₚ ]
//
// so coefficient index 0 is always the intercept.
//
// =============================================================================

mod glm;
mod multinomial;

pub use glm::{GeneralizedLinearRegression, LogisticRegression, PoissonRegression};
pub use multinomial::MultinomialLogisticRegression;

use ndarray::{s, Array2};

use crate::error::{MixStatsError, Result};

/// Prepend a column of ones to `inputs`.
pub fn design_matrix(inputs: &Array2<f64>) -> Array2<f64> {
    let (n, p) = inputs.dim();
    let mut x = Array2::ones((n, p + 1));
    x.slice_mut(s![.., 1..]).assign(inputs);
    x
}

/// Check that `inputs` is non-empty and has `n_inputs` columns.
pub(crate) fn check_inputs(inputs: &Array2<f64>, n_inputs: usize) -> Result<()> {
    if inputs.nrows() == 0 {
        return Err(MixStatsError::EmptyInput("no input rows".to_string()));
    }
    if inputs.ncols() != n_inputs {
        return Err(MixStatsError::DimensionMismatch(format!(
            "model expects {} inputs but got {} columns",
            n_inputs,
            inputs.ncols()
        )));
    }
    if inputs.iter().any(|v| !v.is_finite()) {
        return Err(MixStatsError::InvalidArgument(
            "inputs contain non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Check that there is one output (or label) per input row.
pub(crate) fn check_output_len(n_rows: usize, n_outputs: usize) -> Result<()> {
    if n_rows != n_outputs {
        return Err(MixStatsError::DimensionMismatch(format!(
            "inputs have {} rows but there are {} outputs",
            n_rows, n_outputs
        )));
    }
    Ok(())
}
