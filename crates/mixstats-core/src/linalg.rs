// =============================================================================
// Linear Algebra Utilities
// =============================================================================
//
// ndarray is the storage type of every public API in this crate, while
// nalgebra provides the decompositions (Cholesky, SVD). All conversions
// between the two live here so the solvers never touch nalgebra directly.
//
// THE ROBUST SOLVER
// -----------------
// IRLS and lower-bound Newton-Raphson both need to solve H·Δ = g where H is
// symmetric positive semi-definite by construction. H is usually positive
// definite and Cholesky succeeds. When predictors are collinear (or a class
// never appears) H is singular; we then fall back to the SVD pseudo-inverse,
// which returns the minimum-norm solution instead of failing.
//
// A `RobustSolver` holds the factorisation, so a matrix that is reused
// across iterations (the lower bound) is decomposed exactly once.
//
// =============================================================================

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2};

use crate::error::{MixStatsError, Result};

/// Relative cutoff below which singular values are treated as zero.
const PSEUDO_INVERSE_RCOND: f64 = 1e-10;

// =============================================================================
// ndarray ↔ nalgebra
// =============================================================================

/// Convert an ndarray Array2 to a nalgebra DMatrix.
#[inline]
pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Convert an ndarray Array1 to a nalgebra DVector.
#[inline]
pub fn to_dvector(v: &Array1<f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().copied())
}

/// Convert a nalgebra DMatrix to an ndarray Array2.
#[inline]
pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

/// Convert a nalgebra DVector to an ndarray Array1.
#[inline]
pub fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    v.iter().copied().collect()
}

// =============================================================================
// Robust symmetric solver
// =============================================================================

#[derive(Debug, Clone)]
enum Factorization {
    Cholesky(Cholesky<f64, Dyn>),
    PseudoInverse(DMatrix<f64>),
}

/// A factorised symmetric positive (semi-)definite matrix.
///
/// Tries Cholesky first and falls back to an SVD pseudo-inverse when the
/// matrix is singular or indefinite.
#[derive(Debug, Clone)]
pub struct RobustSolver {
    factorization: Factorization,
    dim: usize,
}

impl RobustSolver {
    /// Factorise `a`. Fails only if `a` is not square, contains non-finite
    /// entries, or the SVD itself does not produce a pseudo-inverse.
    pub fn new(a: &Array2<f64>) -> Result<Self> {
        let (rows, cols) = a.dim();
        if rows != cols {
            return Err(MixStatsError::DimensionMismatch(format!(
                "expected a square matrix, got {}x{}",
                rows, cols
            )));
        }
        if a.iter().any(|v| !v.is_finite()) {
            return Err(MixStatsError::NumericalDegeneracy(
                "matrix contains non-finite entries".to_string(),
            ));
        }

        let m = to_dmatrix(a);
        if let Some(chol) = m.clone().cholesky() {
            return Ok(Self {
                factorization: Factorization::Cholesky(chol),
                dim: rows,
            });
        }

        log::debug!("Cholesky failed on {}x{} matrix; using SVD pseudo-inverse", rows, rows);
        let pinv = pseudo_inverse(&m)?;
        Ok(Self {
            factorization: Factorization::PseudoInverse(pinv),
            dim: rows,
        })
    }

    /// Dimension of the factorised matrix.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// True when the matrix was singular and the pseudo-inverse is in use.
    pub fn is_pseudo_inverse(&self) -> bool {
        matches!(self.factorization, Factorization::PseudoInverse(_))
    }

    /// Solve A·x = b.
    pub fn solve(&self, b: &Array1<f64>) -> Result<Array1<f64>> {
        if b.len() != self.dim {
            return Err(MixStatsError::DimensionMismatch(format!(
                "right-hand side has {} elements but matrix is {}x{}",
                b.len(),
                self.dim,
                self.dim
            )));
        }
        let rhs = to_dvector(b);
        let x = match &self.factorization {
            Factorization::Cholesky(chol) => chol.solve(&rhs),
            Factorization::PseudoInverse(pinv) => pinv * rhs,
        };
        Ok(to_array1(&x))
    }

    /// A⁻¹ (or the pseudo-inverse when A is singular).
    pub fn inverse(&self) -> Array2<f64> {
        match &self.factorization {
            Factorization::Cholesky(chol) => to_array2(&chol.inverse()),
            Factorization::PseudoInverse(pinv) => to_array2(pinv),
        }
    }
}

/// Moore-Penrose pseudo-inverse via SVD.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let svd = m.clone().svd(true, true);
    let s_max = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
    let eps = (PSEUDO_INVERSE_RCOND * s_max).max(f64::MIN_POSITIVE);
    svd.pseudo_inverse(eps)
        .map_err(|e| MixStatsError::LinearAlgebraError(format!("SVD pseudo-inverse failed: {}", e)))
}

/// Lower-triangular Cholesky factor and log-determinant of a symmetric
/// positive definite matrix. Returns None if `a` is not positive definite.
pub fn cholesky_factor(a: &Array2<f64>) -> Option<(Array2<f64>, f64)> {
    let chol = to_dmatrix(a).cholesky()?;
    let l = chol.l();
    let log_det = 2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>();
    Some((to_array2(&l), log_det))
}

/// Solve L·y = b by forward substitution for lower-triangular `l`.
pub fn forward_substitute(l: &Array2<f64>, b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut acc = b[i];
        for j in 0..i {
            acc -= l[[i, j]] * y[j];
        }
        y[i] = acc / l[[i, i]];
    }
    y
}

// =============================================================================
// Tests
// =============================================================================
