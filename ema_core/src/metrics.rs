//! Outcome comparison metrics.
//!
//! Used to check that interchangeable backends agree, e.g. the maximum
//! absolute error between two engines' `prey` series.

use ema_env::OutcomeSeries;

/// Largest absolute pointwise difference.
///
/// Returns `None` when the slices differ in length or are empty; misaligned
/// series are never compared.
pub fn max_abs_error(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max),
    )
}

/// Root-mean-square pointwise difference. Same alignment rules as
/// [`max_abs_error`].
pub fn rmse(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let sum_sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    Some((sum_sq / a.len() as f64).sqrt())
}

/// Per-variable comparison of two outcome series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableComparison {
    pub max_abs_error: f64,
    pub rmse: f64,
}

/// Compares one variable across two outcome series.
pub fn compare_variable(a: &OutcomeSeries, b: &OutcomeSeries, name: &str) -> Option<VariableComparison> {
    let xs = a.get(name)?;
    let ys = b.get(name)?;
    Some(VariableComparison {
        max_abs_error: max_abs_error(xs, ys)?,
        rmse: rmse(xs, ys)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_max_abs_error() {
        assert_eq!(max_abs_error(&[1.0, 2.0, 3.0], &[1.0, 2.5, 1.0]), Some(2.0));
        assert_eq!(max_abs_error(&[1.0], &[1.0]), Some(0.0));
    }

    #[test]
    fn test_misaligned_is_none() {
        assert_eq!(max_abs_error(&[1.0, 2.0], &[1.0]), None);
        assert_eq!(rmse(&[], &[]), None);
    }

    #[test]
    fn test_rmse() {
        let e = rmse(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert_relative_eq!(e, (12.5f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_compare_variable() {
        let a = OutcomeSeries::new().with("prey", vec![1.0, 2.0]);
        let b = OutcomeSeries::new().with("prey", vec![1.0, 4.0]);

        let cmp = compare_variable(&a, &b, "prey").unwrap();
        assert_eq!(cmp.max_abs_error, 2.0);
        assert_relative_eq!(cmp.rmse, 2.0f64.sqrt(), epsilon = 1e-12);

        assert!(compare_variable(&a, &b, "predators").is_none());
    }
}
