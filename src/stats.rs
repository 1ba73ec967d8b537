//! Statistical utility functions shared across modules
//!
//! Quantiles, robust scale estimates, special functions and the local
//! regression smoothers used by dispersion fitting and independent filtering.

use std::cmp::Ordering;

/// qnorm(0.975)
const QNORM_0975: f64 = 1.959963984540054;

/// Consistency constant for the normal-scaled MAD
const MAD_SCALE: f64 = 1.4826;

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Median of the finite values (NaN when none)
pub fn median(values: &[f64]) -> f64 {
    let v = sorted_finite(values);
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

/// Squared normal-consistent median absolute deviation
pub fn mad_squared(values: &[f64]) -> f64 {
    let center = median(values);
    if !center.is_finite() {
        return 0.0;
    }
    let deviations: Vec<f64> = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| (x - center).abs())
        .collect();
    let mad = median(&deviations) * MAD_SCALE;
    mad * mad
}

/// Quantile with linear interpolation between order statistics (type 7)
pub fn quantile_type7(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        1 => sorted[0],
        _ => {
            let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo] + (h - lo as f64) * (sorted[hi.min(n - 1)] - sorted[lo])
        }
    }
}

/// Mean and unbiased variance of a slice
pub fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n;
    let var = if n > 1.0 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, var)
}

/// Trigamma function via recurrence and asymptotic expansion
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Weighted quantile with normalized weights and right-continuous step
/// interpolation over the cumulative weights.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(xi, wi)| **wi > 0.0 && xi.is_finite() && wi.is_finite())
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();

    // collapse ties
    let mut values: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut cumulative: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut running = 0.0;
    for (xi, wi) in pairs {
        running += wi * scale;
        if values.last() == Some(&xi) {
            if let Some(last) = cumulative.last_mut() {
                *last = running;
            }
        } else {
            values.push(xi);
            cumulative.push(running);
        }
    }

    let total = running;
    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    let step = |target: f64| -> f64 {
        let idx = cumulative
            .iter()
            .position(|&c| c >= target)
            .unwrap_or(values.len() - 1);
        values[idx]
    };
    (1.0 - frac) * step(low) + frac * step(high)
}

/// Variance of a zero-centered normal whose weighted upper quantile of
/// absolute values matches that of `x`.
pub fn match_weighted_upper_quantile_for_variance(
    x: &[f64],
    weights: &[f64],
    upper_quantile: f64,
) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    let var = sd * sd;
    if var > 0.0 && var.is_finite() {
        var
    } else {
        1e-6
    }
}

fn tricube(u: f64) -> f64 {
    if u < 1.0 {
        let t = 1.0 - u * u * u;
        t * t * t
    } else {
        0.0
    }
}

/// Local polynomial fit evaluated at `x0` using the `k` nearest points.
///
/// `degree` is 1 (local linear) or 2 (local quadratic). Points carry an
/// additional prior weight (robustness or observation weights).
fn local_fit_at(x: &[f64], y: &[f64], prior: &[f64], x0: f64, k: usize, degree: usize) -> f64 {
    let mut dist: Vec<(usize, f64)> = (0..x.len()).map(|j| (j, (x[j] - x0).abs())).collect();
    dist.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    let neighbours = &dist[..k.min(dist.len())];
    let bandwidth = neighbours.last().map(|d| d.1).unwrap_or(0.0).max(1e-10) * 1.000001;

    let n_par = degree + 1;
    let mut xtwx = vec![0.0; n_par * n_par];
    let mut xtwy = vec![0.0; n_par];
    let mut sum_w = 0.0;
    let mut sum_wy = 0.0;
    for &(j, d) in neighbours {
        let w = tricube(d / bandwidth) * prior[j];
        if w <= 0.0 {
            continue;
        }
        let dx = x[j] - x0;
        let basis = [1.0, dx, dx * dx];
        for a in 0..n_par {
            xtwy[a] += w * basis[a] * y[j];
            for b in 0..n_par {
                xtwx[a * n_par + b] += w * basis[a] * basis[b];
            }
        }
        sum_w += w;
        sum_wy += w * y[j];
    }
    match crate::linalg::solve(&xtwx, &xtwy, n_par) {
        Some(coef) if coef[0].is_finite() => coef[0],
        _ if sum_w > 0.0 => sum_wy / sum_w,
        _ => f64::NAN,
    }
}

/// Weighted local quadratic regression evaluated at `at`
pub fn local_quadratic(x: &[f64], y: &[f64], weights: &[f64], at: &[f64], span: f64) -> Vec<f64> {
    let k = ((x.len() as f64 * span).ceil() as usize).clamp(3.min(x.len()), x.len());
    at.iter()
        .map(|&x0| local_fit_at(x, y, weights, x0, k, 2))
        .collect()
}

/// LOWESS smoother: local linear fits with bisquare robustness iterations
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 3 {
        return y.to_vec();
    }
    let k = ((n as f64 * span).round() as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iter in 0..=iterations {
        for i in 0..n {
            fitted[i] = local_fit_at(x, y, &robustness, x[i], k, 1);
        }
        if iter == iterations {
            break;
        }
        let residuals: Vec<f64> = (0..n).map(|i| (y[i] - fitted[i]).abs()).collect();
        let scale = 6.0 * median(&residuals);
        if scale <= 0.0 || !scale.is_finite() {
            break;
        }
        for i in 0..n {
            let u = residuals[i] / scale;
            robustness[i] = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
        let mad2 = mad_squared(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        assert!((mad2 - (MAD_SCALE * 1.0).powi(2)).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma() {
        // trigamma(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-8);
        // trigamma(1.5) = pi^2/2 - 4
        let expected = std::f64::consts::PI.powi(2) / 2.0 - 4.0;
        assert!((trigamma(1.5) - expected).abs() < 1e-8);
    }

    #[test]
    fn test_quantile_type7() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_type7(&v, 0.0), 1.0);
        assert_eq!(quantile_type7(&v, 1.0), 4.0);
        assert!((quantile_type7(&v, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_quantile() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((weighted_quantile(&x, &[1.0; 5], 0.5) - 3.0).abs() < 1e-10);
        let skewed = weighted_quantile(&x, &[1.0, 1.0, 1.0, 1.0, 100.0], 0.5);
        assert!(skewed >= 4.0);
    }

    #[test]
    fn test_upper_quantile_variance_positive() {
        let x = vec![0.1, -0.2, 0.3, -0.1, 0.5, -0.3, 0.2, -0.4, 0.15, -0.25];
        let var = match_weighted_upper_quantile_for_variance(&x, &[1.0; 10], 0.05);
        assert!(var > 0.0 && var.is_finite());
    }

    #[test]
    fn test_local_quadratic_recovers_parabola() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 / 4.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 0.5 * v * v).collect();
        let fit = local_quadratic(&x, &y, &vec![1.0; 40], &[2.0, 5.0], 0.5);
        assert!((fit[0] - 3.0).abs() < 1e-6);
        assert!((fit[1] - 13.5).abs() < 1e-6);
    }

    #[test]
    fn test_lowess_linear_data() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let fit = lowess(&x, &y, 0.3, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-6);
        }
    }
}
