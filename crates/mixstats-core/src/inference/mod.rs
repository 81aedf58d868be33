// =============================================================================
// Statistical Inference
// =============================================================================
//
// Tests and intervals for fitted regression coefficients:
//
//   - Wald tests:  z = β̂ / se(β̂), two-sided p-value from N(0, 1)
//   - Intervals:   β̂ ± z_{1−α/2} · se, or t-based for small samples
//   - Odds ratios: exp of the coefficient interval (logit link)
//   - Likelihood-ratio test between nested models, χ² reference
//
// Standard errors come from the fitting engines (sqrt of the diagonal of
// the inverse curvature), so everything here is asymptotic.
//
// Degenerate inputs (non-finite estimates, zero standard errors) produce
// NaN rather than an error, so one bad coefficient does not hide the rest
// of a summary table.
//
// =============================================================================

use ndarray::Array1;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

use crate::error::{MixStatsError, Result};

/// Above this many degrees of freedom the t reference is replaced by N(0, 1).
const T_TO_Z_DF: f64 = 1000.0;

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

// =============================================================================
// P-values
// =============================================================================

/// Two-sided p-value for a z statistic: 2 (1 − Φ(|z|)).
pub fn pvalue_z(z: f64) -> f64 {
    match (z.is_finite(), standard_normal()) {
        (true, Some(normal)) => 2.0 * normal.sf(z.abs()),
        _ => f64::NAN,
    }
}

/// Two-sided p-value for a t statistic with `df` degrees of freedom.
pub fn pvalue_t(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    if df > T_TO_Z_DF {
        return pvalue_z(t);
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * dist.sf(t.abs()),
        Err(_) => f64::NAN,
    }
}

// =============================================================================
// Confidence intervals
// =============================================================================

/// `estimate ± z_{1−α/2} · std_error` at the given confidence level.
pub fn confidence_interval_z(estimate: f64, std_error: f64, confidence: f64) -> (f64, f64) {
    if !estimate.is_finite() || !std_error.is_finite() || std_error <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    match standard_normal() {
        Some(normal) => {
            let margin = normal.inverse_cdf(0.5 + confidence / 2.0) * std_error;
            (estimate - margin, estimate + margin)
        }
        None => (f64::NAN, f64::NAN),
    }
}

/// t-based interval, for small samples.
pub fn confidence_interval_t(estimate: f64, std_error: f64, df: f64, confidence: f64) -> (f64, f64) {
    if !estimate.is_finite() || !std_error.is_finite() || std_error <= 0.0 || df <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    if df > T_TO_Z_DF {
        return confidence_interval_z(estimate, std_error, confidence);
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => {
            let margin = dist.inverse_cdf(0.5 + confidence / 2.0) * std_error;
            (estimate - margin, estimate + margin)
        }
        Err(_) => (f64::NAN, f64::NAN),
    }
}

/// Interval for exp(β): the exponentiated coefficient interval.
///
/// Exponentiating the endpoints keeps the coverage because exp is
/// monotone; the interval is not symmetric around exp(β̂).
pub fn odds_ratio_interval(estimate: f64, std_error: f64, confidence: f64) -> (f64, f64) {
    let (lower, upper) = confidence_interval_z(estimate, std_error, confidence);
    (lower.exp(), upper.exp())
}

// =============================================================================
// Wald tests
// =============================================================================

/// Wald test of H₀: β = 0 for one coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaldTest {
    pub estimate: f64,
    pub std_error: f64,
    pub z: f64,
    pub p_value: f64,
    pub lower: f64,
    pub upper: f64,
}

impl WaldTest {
    pub fn new(estimate: f64, std_error: f64, confidence: f64) -> Self {
        let z = if std_error > 0.0 { estimate / std_error } else { f64::NAN };
        let (lower, upper) = confidence_interval_z(estimate, std_error, confidence);
        Self {
            estimate,
            std_error,
            z,
            p_value: pvalue_z(z),
            lower,
            upper,
        }
    }

    pub fn odds_ratio(&self) -> f64 {
        self.estimate.exp()
    }

    /// Odds-ratio interval, (exp(lower), exp(upper)).
    pub fn odds_ratio_interval(&self) -> (f64, f64) {
        (self.lower.exp(), self.upper.exp())
    }

    pub fn stars(&self) -> &'static str {
        significance_stars(self.p_value)
    }
}

/// Wald tests for every coefficient of a fit.
pub fn wald_tests(
    coefficients: &Array1<f64>,
    standard_errors: &Array1<f64>,
    confidence: f64,
) -> Result<Vec<WaldTest>> {
    if coefficients.len() != standard_errors.len() {
        return Err(MixStatsError::DimensionMismatch(format!(
            "{} coefficients but {} standard errors",
            coefficients.len(),
            standard_errors.len()
        )));
    }
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(MixStatsError::InvalidArgument(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    Ok(coefficients
        .iter()
        .zip(standard_errors.iter())
        .map(|(&b, &se)| WaldTest::new(b, se, confidence))
        .collect())
}

// =============================================================================
// Likelihood-ratio test
// =============================================================================

/// p-value of the likelihood-ratio test between nested models.
///
/// The statistic 2 (ℓ_full − ℓ_restricted) is compared with χ²(df), where
/// df is the number of extra parameters in the full model.
pub fn likelihood_ratio_test(restricted_log_likelihood: f64, full_log_likelihood: f64, df: usize) -> Result<f64> {
    if df == 0 {
        return Err(MixStatsError::InvalidArgument(
            "likelihood-ratio test needs at least one degree of freedom".to_string(),
        ));
    }
    let statistic = (2.0 * (full_log_likelihood - restricted_log_likelihood)).max(0.0);
    let chi2 = ChiSquared::new(df as f64).map_err(|e| MixStatsError::InvalidArgument(e.to_string()))?;
    Ok(chi2.sf(statistic))
}

// =============================================================================
// Summary tables
// =============================================================================

/// R-style significance code: "***" < 0.001 ≤ "**" < 0.01 ≤ "*" < 0.05 ≤ "." < 0.1.
pub fn significance_stars(pvalue: f64) -> &'static str {
    match pvalue {
        p if p < 0.001 => "***",
        p if p < 0.01 => "**",
        p if p < 0.05 => "*",
        p if p < 0.1 => ".",
        _ => "",
    }
}
