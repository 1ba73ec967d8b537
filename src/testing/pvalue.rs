//! P-values from test statistics

use statrs::function::erf::erfc;

/// Two-sided normal p-value, `2 * pnorm(-|z|)`; NaN for a non-finite statistic
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        assert!((calculate_pvalue(2.0) - calculate_pvalue(-2.0)).abs() < 1e-15);
    }

    #[test]
    fn test_known_values() {
        assert!((calculate_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!((calculate_pvalue(1.959963984540054) - 0.05).abs() < 1e-9);
        assert!(calculate_pvalue(40.0) >= 0.0);
    }

    #[test]
    fn test_nan_statistic() {
        assert!(calculate_pvalue(f64::NAN).is_nan());
    }
}
