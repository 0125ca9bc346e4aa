//! Hypothesis tests over glucose samples.
//!
//! Two-tailed p-values come from the statrs Student's t CDF. Welch's test
//! (unequal variances) is used between strata; a paired test is used for
//! within-stratum pre/post comparisons.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Summary of one sample group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSummary {
    pub mean: f64,
    pub variance: f64,
    pub n: usize,
}

impl SampleSummary {
    /// Mean and unbiased sample variance. Returns None for fewer than two
    /// observations.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n < 2 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
        Some(Self { mean, variance, n })
    }
}

/// Two-tailed p-value for a t statistic with `df` degrees of freedom.
fn two_tailed_p(t_stat: f64, df: f64) -> f64 {
    if !t_stat.is_finite() || df < 1.0 {
        return 1.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * (1.0 - dist.cdf(t_stat.abs())),
        Err(_) => 1.0,
    }
}

/// Welch's unequal-variances t-test between two summarized groups.
///
/// Returns (t statistic, p-value), or None when either group is too small
/// or both variances vanish.
pub fn welch_t_test(a: &SampleSummary, b: &SampleSummary) -> Option<(f64, f64)> {
    if a.n < 2 || b.n < 2 {
        return None;
    }
    let var_a = a.variance / a.n as f64;
    let var_b = b.variance / b.n as f64;
    let pooled = var_a + var_b;
    if pooled <= 0.0 {
        return None;
    }

    let t_stat = (a.mean - b.mean) / pooled.sqrt();

    // Welch–Satterthwaite degrees of freedom
    let df = pooled.powi(2)
        / (var_a.powi(2) / (a.n as f64 - 1.0) + var_b.powi(2) / (b.n as f64 - 1.0));

    Some((t_stat, two_tailed_p(t_stat, df)))
}

/// Paired t-test on per-unit differences (e.g. post-meal mean minus
/// pre-meal mean, one difference per window).
///
/// Returns (mean difference, t statistic, p-value), or None when fewer than
/// two pairs or zero variance.
pub fn paired_t_test(differences: &[f64]) -> Option<(f64, f64, f64)> {
    let summary = SampleSummary::from_values(differences)?;
    if summary.variance <= 0.0 {
        return None;
    }
    let se = (summary.variance / summary.n as f64).sqrt();
    let t_stat = summary.mean / se;
    let df = summary.n as f64 - 1.0;
    Some((summary.mean, t_stat, two_tailed_p(t_stat, df)))
}
