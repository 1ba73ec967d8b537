//! Maximum a posteriori dispersions with a log-normal prior centered on the trend

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::gene_wise::{maximize_log_posterior, DispersionPrior, GeneWiseDispersions};
use super::{DispersionEstimates, DispersionParams, DispersionTrend};
use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::{local_quadratic, mad_squared, trigamma};

const MIN_PRIOR_VAR: f64 = 0.25;
const KL_SEED: u64 = 2;
const KL_SIMULATIONS: usize = 10_000;

/// Shrink gene-wise dispersions toward `trended`
pub fn estimate_map_dispersions(
    dds: &CountDataSet,
    gene_wise: GeneWiseDispersions,
    trend: DispersionTrend,
    trended: Array1<f64>,
    params: &DispersionParams,
) -> Result<DispersionEstimates> {
    let n_genes = dds.n_genes();
    if gene_wise.dispersions.len() != n_genes || trended.len() != n_genes {
        return Err(PipelineError::DispersionEstimationFailed {
            reason: "gene-wise and trended dispersions do not cover every gene".to_string(),
        });
    }
    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (m, p) = design.dim();
    let max_disp = (m as f64).max(10.0);

    let trended_slice = trended.to_vec();
    let (prior_var, var_log_disp_ests) =
        estimate_prior_variance(&gene_wise.dispersions, &trended_slice, m, p, params.min_disp);
    log::debug!(
        "Dispersion prior variance {:.4} (varLogDispEsts {:.4})",
        prior_var,
        var_log_disp_ests
    );

    let map: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let gene = gene_wise.dispersions[i];
            let fitted = trended_slice[i];
            if !gene.is_finite() || !fitted.is_finite() || fitted <= 0.0 {
                return f64::NAN;
            }
            let y: Vec<f64> = counts.row(i).to_vec();
            let mu: Vec<f64> = gene_wise.mu.row(i).to_vec();
            let start = if gene > 0.1 * fitted { gene } else { fitted };
            let prior = DispersionPrior {
                log_mean: fitted.ln(),
                variance: prior_var,
            };
            maximize_log_posterior(&y, &mu, design, start, Some(&prior), params, max_disp).alpha
        })
        .collect();

    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();
    let outliers: Vec<bool> = gene_wise
        .dispersions
        .iter()
        .zip(&trended_slice)
        .map(|(&g, &t)| g.is_finite() && g > 0.0 && t > 0.0 && g.ln() - t.ln() > threshold)
        .collect();
    let final_dispersions: Array1<f64> = map
        .iter()
        .zip(&outliers)
        .zip(&gene_wise.dispersions)
        .map(|((&d, &outlier), &g)| if outlier { g } else { d })
        .collect();

    Ok(DispersionEstimates {
        gene_wise: Array1::from_vec(gene_wise.dispersions),
        trended,
        final_dispersions,
        trend,
        prior_var,
        var_log_disp_ests,
        outliers,
        mu: gene_wise.mu,
        gene_converged: gene_wise.converged,
    })
}

/// Prior variance of log dispersion around the trend and the observed
/// spread `varLogDispEsts` (squared MAD of log residuals).
///
/// The sampling variance of log gene-wise estimates, `trigamma((m-p)/2)`,
/// is subtracted; with three or fewer residual degrees of freedom the
/// prior variance is matched by simulation instead.
pub fn estimate_prior_variance(
    gene_wise: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_wise
        .iter()
        .zip(trended)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();
    if residuals.len() < 3 || n_samples <= n_coefs {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }
    let var_log_disp_ests = mad_squared(&residuals);
    let df = (n_samples - n_coefs) as f64;

    let prior_var = if df <= 3.0 {
        prior_variance_by_simulation(&residuals, n_samples - n_coefs)
    } else {
        var_log_disp_ests - trigamma(df / 2.0)
    };
    (prior_var.max(MIN_PRIOR_VAR), var_log_disp_ests)
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn density(values: &[f64], breaks: &[f64]) -> Vec<f64> {
    let width = breaks[1] - breaks[0];
    let mut counts = vec![0usize; breaks.len() - 1];
    let mut total = 0usize;
    for &v in values {
        if v <= breaks[0] || v >= breaks[breaks.len() - 1] {
            continue;
        }
        let bin = (((v - breaks[0]) / width) as usize).min(counts.len() - 1);
        counts[bin] += 1;
        total += 1;
    }
    counts
        .into_iter()
        .map(|c| if total > 0 { c as f64 / (total as f64 * width) } else { 0.0 })
        .collect()
}

/// Prior variance whose simulated residual distribution (log chi-squared
/// plus normal) is closest in KL divergence to the observed residuals
fn prior_variance_by_simulation(residuals: &[f64], df: usize) -> f64 {
    let mut rng = StdRng::seed_from_u64(KL_SEED);
    let breaks: Vec<f64> = (-20..=20).map(|i| i as f64 / 2.0).collect();
    let observed = density(residuals, &breaks);
    let dff = df as f64;

    let grid: Vec<f64> = (0..200).map(|i| i as f64 * 8.0 / 199.0).collect();
    let kl: Vec<f64> = grid
        .iter()
        .map(|&var| {
            let sd = var.sqrt();
            let simulated: Vec<f64> = (0..KL_SIMULATIONS)
                .map(|_| {
                    let chi: f64 = (0..df).map(|_| standard_normal(&mut rng).powi(2)).sum();
                    chi.max(f64::MIN_POSITIVE).ln() + standard_normal(&mut rng) * sd - dff.ln()
                })
                .collect();
            let sim = density(&simulated, &breaks);
            let small = observed
                .iter()
                .chain(&sim)
                .copied()
                .filter(|v| *v > 0.0)
                .fold(f64::INFINITY, f64::min);
            observed
                .iter()
                .zip(&sim)
                .filter(|(o, _)| **o > 0.0)
                .map(|(o, s)| o * ((o + small).ln() - (s + small).ln()))
                .sum()
        })
        .collect();

    let fine: Vec<f64> = (0..1000).map(|i| i as f64 * 8.0 / 999.0).collect();
    let smoothed = local_quadratic(&grid, &kl, &vec![1.0; grid.len()], &fine, 0.2);
    fine.iter()
        .zip(&smoothed)
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(x, _)| *x)
        .unwrap_or(MIN_PRIOR_VAR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, TrendFitMethod};
    use crate::normalization::estimate_size_factors;
    use ndarray::Array2;

    #[test]
    fn test_prior_variance_floor() {
        let gene = vec![0.1; 50];
        let trend = vec![0.1; 50];
        let (prior, var_log) = estimate_prior_variance(&gene, &trend, 12, 2, 1e-8);
        assert_eq!(prior, 0.25);
        assert_eq!(var_log, 0.0);
    }

    #[test]
    fn test_prior_variance_from_spread() {
        let gene: Vec<f64> = (0..101).map(|i| 0.1 * ((i as f64 - 50.0) / 10.0).exp()).collect();
        let trend = vec![0.1; 101];
        let (prior, var_log) = estimate_prior_variance(&gene, &trend, 30, 2, 1e-8);
        assert!(var_log > 4.0);
        assert!((prior - (var_log - trigamma(14.0))).abs() < 1e-10);
    }

    #[test]
    fn test_simulated_prior_variance_is_bounded() {
        let residuals: Vec<f64> = (0..300).map(|i| ((i % 30) as f64 - 15.0) / 6.0).collect();
        let v = prior_variance_by_simulation(&residuals, 2);
        assert!((0.0..=8.0).contains(&v));
    }

    fn synthetic_dataset() -> CountDataSet {
        let n_genes = 60;
        let samples: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let mut counts = Array2::zeros((n_genes, 6));
        for g in 0..n_genes {
            let base = 20.0 + 15.0 * g as f64;
            for j in 0..6 {
                // spread shrinks relative to the mean as expression grows
                let wiggle = [0.8, 1.1, 1.05, 0.9, 1.2, 0.95][(j + g) % 6];
                let scale = 1.0 + (wiggle - 1.0) * (1.0 + 30.0 / base);
                counts[[g, j]] = (base * scale.max(0.1)).round();
            }
        }
        let genes = (0..n_genes).map(|g| format!("g{}", g)).collect();
        let cm = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples);
        meta.add_condition("group", ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect())
            .unwrap();
        let mut dds = CountDataSet::with_factor(cm, meta, "group", None).unwrap();
        estimate_size_factors(&mut dds).unwrap();
        dds
    }

    #[test]
    fn test_map_shrinks_toward_trend() {
        let mut dds = synthetic_dataset();
        estimate_dispersions(&mut dds, TrendFitMethod::Parametric, &DispersionParams::default()).unwrap();
        let est = dds.dispersions().unwrap();
        assert!(est.prior_var >= 0.25);
        assert!(est.final_dispersions.iter().all(|d| d.is_finite() && *d > 0.0));

        let spread = |values: &Array1<f64>| -> f64 {
            values
                .iter()
                .zip(est.trended.iter())
                .zip(&est.outliers)
                .filter(|((g, _), outlier)| **g > 1e-6 && !**outlier)
                .map(|((v, t), _)| (v.ln() - t.ln()).powi(2))
                .sum()
        };
        let before = spread(&est.gene_wise);
        let after = spread(&est.final_dispersions);
        assert!(after < before, "{} >= {}", after, before);
    }

    #[test]
    fn test_no_replicates_rejected() {
        let samples: Vec<String> = vec!["s1".into(), "s2".into()];
        let cm = CountMatrix::new(
            ndarray::array![[10.0, 20.0], [5.0, 7.0]],
            vec!["g1".into(), "g2".into()],
            samples.clone(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(samples);
        meta.add_condition("group", vec!["a".into(), "b".into()]).unwrap();
        let mut dds = CountDataSet::with_factor(cm, meta, "group", None).unwrap();
        estimate_size_factors(&mut dds).unwrap();
        assert!(matches!(
            estimate_dispersions(&mut dds, TrendFitMethod::Parametric, &DispersionParams::default()),
            Err(PipelineError::DispersionEstimationFailed { .. })
        ));
    }
}
