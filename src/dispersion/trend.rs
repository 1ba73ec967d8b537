//! Mean-dispersion trend fitting

use super::{DispersionTrend, TrendFitMethod};
use crate::error::{PipelineError, Result};

const PARAMETRIC_ITERATIONS: usize = 11;
const GAMMA_IRLS_ITERATIONS: usize = 25;

/// Fit the trend of gene-wise dispersions against mean normalized counts.
///
/// Only genes with a positive mean and a dispersion above `100 * min_disp`
/// take part. A failed parametric fit falls back to the local fit, and a
/// local fit without enough support falls back to the mean.
pub fn fit_dispersion_trend(
    means: &[f64],
    dispersions: &[f64],
    method: TrendFitMethod,
    min_disp: f64,
) -> Result<DispersionTrend> {
    if means.len() != dispersions.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} dispersions", means.len()),
            got: format!("{}", dispersions.len()),
        });
    }
    let usable: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && m.is_finite() && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();
    if usable.is_empty() {
        return Err(PipelineError::TrendFittingFailed {
            reason: "all gene-wise dispersions are within 2 orders of magnitude of the minimum value; \
                     the counts show no overdispersion"
                .to_string(),
        });
    }

    match method {
        TrendFitMethod::Parametric => match fit_parametric(&usable) {
            Ok((asympt_disp, extra_pois)) => {
                log::debug!("Parametric trend: asymptDisp={:.5}, extraPois={:.4}", asympt_disp, extra_pois);
                Ok(DispersionTrend::Parametric {
                    asympt_disp,
                    extra_pois,
                })
            }
            Err(e) => {
                log::warn!("{}; using local regression fit instead", e);
                fit_local(&usable, dispersions, min_disp)
            }
        },
        TrendFitMethod::Local => fit_local(&usable, dispersions, min_disp),
        TrendFitMethod::Mean => Ok(fit_mean(dispersions, min_disp)),
    }
}

/// Iterated Gamma-family identity-link GLM `disp ~ 1 + 1/mean`, dropping
/// genes whose ratio to the current fit leaves `(1e-4, 15)`
fn fit_parametric(data: &[(f64, f64)]) -> Result<(f64, f64)> {
    let mut coefs = (0.1_f64, 1.0_f64);
    for _ in 0..PARAMETRIC_ITERATIONS {
        let previous = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                let ratio = disp / fitted;
                fitted > 0.0 && ratio > 1e-4 && ratio < 15.0
            })
            .collect();
        if good.len() < 3 {
            return Err(PipelineError::TrendFittingFailed {
                reason: "too few genes with moderate residuals for the parametric fit".to_string(),
            });
        }

        let (next, glm_converged) = gamma_identity_glm(&good, coefs);
        coefs = next;
        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(PipelineError::TrendFittingFailed {
                reason: format!(
                    "parametric dispersion fit failed, coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }
        let change = (coefs.0 / previous.0).ln().powi(2) + (coefs.1 / previous.1).ln().powi(2);
        if change < 1e-6 && glm_converged {
            return Ok(coefs);
        }
    }
    Err(PipelineError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// IRLS for `disp ~ a0 + a1 * (1/mean)` with Gamma variance; returns the
/// coefficients and whether the deviance converged
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..GAMMA_IRLS_ITERATIONS {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-12 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

/// Local quadratic fit of log dispersion on log mean, weighted by mean
fn fit_local(usable: &[(f64, f64)], all: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let support: Vec<&(f64, f64)> = usable.iter().filter(|(_, d)| *d >= 10.0 * min_disp).collect();
    if support.len() < 3 {
        log::warn!("too few genes for a local dispersion fit; using the mean dispersion");
        return Ok(fit_mean(all, min_disp));
    }
    Ok(DispersionTrend::Local {
        log_means: support.iter().map(|(m, _)| m.ln()).collect(),
        log_dispersions: support.iter().map(|(_, d)| d.ln()).collect(),
        weights: support.iter().map(|(m, _)| *m).collect(),
    })
}

/// Trimmed (0.1% each side) mean of dispersions above `10 * min_disp`
fn fit_mean(dispersions: &[f64], min_disp: f64) -> DispersionTrend {
    let mut valid: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 10.0 * min_disp)
        .collect();
    if valid.is_empty() {
        return DispersionTrend::Mean(min_disp);
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    let trim = (valid.len() as f64 * 0.001).floor() as usize;
    let kept = &valid[trim..valid.len() - trim];
    DispersionTrend::Mean(kept.iter().sum::<f64>() / kept.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parametric_data(a0: f64, a1: f64) -> (Vec<f64>, Vec<f64>) {
        let means: Vec<f64> = (1..=200).map(|i| 2.0 * i as f64).collect();
        // multiplicative wiggle around the curve
        let disps = means
            .iter()
            .enumerate()
            .map(|(i, m)| (a0 + a1 / m) * if i % 2 == 0 { 1.2 } else { 1.0 / 1.2 })
            .collect();
        (means, disps)
    }

    #[test]
    fn test_parametric_recovers_coefficients() {
        let (means, disps) = parametric_data(0.05, 3.0);
        let trend = fit_dispersion_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8).unwrap();
        let (a0, a1) = trend.parametric_coefficients().unwrap();
        assert!((a0 - 0.05).abs() / 0.05 < 0.1);
        assert!((a1 - 3.0).abs() / 3.0 < 0.1);
    }

    #[test]
    fn test_increasing_dispersion_falls_back_to_local() {
        let means: Vec<f64> = (1..=50).map(|i| i as f64 * 10.0).collect();
        let disps: Vec<f64> = means.iter().map(|m| 0.001 * m).collect();
        let trend = fit_dispersion_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8).unwrap();
        assert_eq!(trend.method(), TrendFitMethod::Local);
        let fitted = trend.eval(&[100.0]);
        assert!((fitted[0] - 0.1).abs() < 0.02);
    }

    #[test]
    fn test_mean_trend() {
        let trend = fit_dispersion_trend(&[1.0, 2.0, 3.0], &[0.1, 0.2, 0.3], TrendFitMethod::Mean, 1e-8).unwrap();
        match trend {
            DispersionTrend::Mean(d) => assert!((d - 0.2).abs() < 1e-12),
            other => panic!("unexpected trend {:?}", other),
        }
    }

    #[test]
    fn test_no_overdispersion_is_an_error() {
        let result = fit_dispersion_trend(&[1.0, 2.0], &[1e-8, 1e-8], TrendFitMethod::Parametric, 1e-8);
        assert!(matches!(result, Err(PipelineError::TrendFittingFailed { .. })));
    }
}
