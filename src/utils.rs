//! Utility functions shared by the filters.

use crate::{Error, Result};

/// Weighted quantile of `(value, weight)` pairs sorted by value.
///
/// Returns the smallest value whose cumulative weight reaches `q`. Weights
/// need not be normalized. Returns `None` for an empty slice.
pub fn weighted_quantile_sorted(sorted: &[(f64, f64)], q: f64) -> Option<f64> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    let total: f64 = sorted.iter().map(|&(_, w)| w).sum();
    if total <= 0.0 {
        return Some(first.0);
    }

    let target = q.clamp(0.0, 1.0) * total;
    let mut cumulative = 0.0;
    for &(value, w) in sorted {
        cumulative += w;
        if cumulative >= target {
            return Some(value);
        }
    }
    Some(last.0)
}

/// Equal-tailed weighted credible interval at `level` (e.g. 0.95).
///
/// Sorts a copy of the pairs; `values` and `weights` must have equal length.
pub fn weighted_credible_interval(values: &[f64], weights: &[f64], level: f64) -> Option<(f64, f64)> {
    let mut sorted: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let alpha = (1.0 - level) / 2.0;
    let lower = weighted_quantile_sorted(&sorted, alpha)?;
    let upper = weighted_quantile_sorted(&sorted, 1.0 - alpha)?;
    Some((lower, upper))
}

/// Reject a non-finite or non-positive configuration value.
pub fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "{} must be positive and finite, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Reject a negative or non-finite configuration value.
pub fn require_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidConfig(format!(
            "{} must be non-negative and finite, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Reject a value outside the open unit interval.
pub fn require_open_unit(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(Error::InvalidConfig(format!(
            "{} must lie in (0, 1), got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_quantile_uniform() {
        let sorted: Vec<(f64, f64)> = (1..=10).map(|v| (v as f64, 0.1)).collect();
        assert_eq!(weighted_quantile_sorted(&sorted, 0.5), Some(5.0));
        assert_eq!(weighted_quantile_sorted(&sorted, 0.0), Some(1.0));
        assert_eq!(weighted_quantile_sorted(&sorted, 1.0), Some(10.0));
    }

    #[test]
    fn test_weighted_quantile_skewed() {
        let sorted = [(1.0, 0.05), (2.0, 0.05), (3.0, 0.9)];
        assert_eq!(weighted_quantile_sorted(&sorted, 0.5), Some(3.0));
        assert_eq!(weighted_quantile_sorted(&sorted, 0.05), Some(1.0));
    }

    #[test]
    fn test_weighted_quantile_empty() {
        assert_eq!(weighted_quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn test_credible_interval_unsorted_input() {
        let values = [5.0, 1.0, 3.0, 4.0, 2.0];
        let weights = [0.2; 5];
        let (lo, hi) = weighted_credible_interval(&values, &weights, 0.5).unwrap();
        assert_eq!(lo, 2.0);
        assert_eq!(hi, 4.0);
    }

    #[test]
    fn test_config_checks() {
        assert!(require_positive("q", 1.0).is_ok());
        assert!(require_positive("q", 0.0).is_err());
        assert!(require_positive("q", f64::NAN).is_err());
        assert!(require_non_negative("q", 0.0).is_ok());
        assert!(require_non_negative("q", -1.0).is_err());
        assert!(require_open_unit("level", 0.95).is_ok());
        assert!(require_open_unit("level", 1.0).is_err());
    }
}
