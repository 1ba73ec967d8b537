//! Cook's distance outlier flagging
//!
//! `cooks = r^2 / p * h / (1 - h)^2` with Pearson residuals `r` computed
//! under a robust method-of-moments dispersion and hat diagonals `h` from
//! the GLM fit.

use ndarray::Array2;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::nb_variance;
use crate::io::DeResults;

/// Floor on the robust dispersion
const MIN_ROBUST_DISP: f64 = 0.04;

/// Samples per cell needed before a sample's Cook's distance counts
pub const MIN_REPLICATES: usize = 3;

/// `qf(0.99, p, m - p)`, infinite when there are no residual degrees of freedom
pub fn default_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64)
        .map(|f| f.inverse_cdf(0.99))
        .unwrap_or(f64::INFINITY)
}

fn trimmed_mean(values: &mut [f64], trim: f64) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let k = (n as f64 * trim).floor() as usize;
    let kept = if 2 * k < n { &values[k..n - k] } else { &values[..] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Scaled trimmed mean of squared deviations from the trimmed mean
fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(&mut values.to_vec(), trim);
    let mut sq: Vec<f64> = values.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&mut sq, trim)
}

/// Trimmed variance within one cell; trimming depends on the cell size
fn cell_variance(values: &[f64]) -> f64 {
    match values.len() {
        0..=3 => trimmed_variance(values, 1.0 / 3.0, 2.04),
        4..=23 => trimmed_variance(values, 1.0 / 4.0, 1.86),
        _ => trimmed_variance(values, 1.0 / 8.0, 1.51),
    }
}

/// Cells (distinct design rows) holding at least [`MIN_REPLICATES`] samples
fn replicated_cells(dds: &CountDataSet) -> Vec<Vec<usize>> {
    let cells = dds.design().cells();
    let n_cells = cells.iter().copied().max().map(|c| c + 1).unwrap_or(0);
    let mut members = vec![Vec::new(); n_cells];
    for (j, &c) in cells.iter().enumerate() {
        members[c].push(j);
    }
    members.into_iter().filter(|m| m.len() >= MIN_REPLICATES).collect()
}

/// Dispersion from trimmed variances, within replicated cells when there
/// are any (largest cell variance), otherwise across all samples
pub fn robust_method_of_moments_disp(dds: &CountDataSet) -> Result<Vec<f64>> {
    let normalized = dds.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before Cook's distances".to_string(),
    })?;
    let replicated = replicated_cells(dds);

    Ok(normalized
        .rows()
        .into_iter()
        .map(|row| {
            let values: Vec<f64> = row.to_vec();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance = if replicated.is_empty() {
                trimmed_variance(&values, 1.0 / 8.0, 1.51)
            } else {
                replicated
                    .iter()
                    .map(|cell| cell_variance(&cell.iter().map(|&j| values[j]).collect::<Vec<_>>()))
                    .fold(0.0, f64::max)
            };
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect())
}

/// Genes x samples Cook's distances from the fitted GLM
pub fn calculate(dds: &CountDataSet) -> Result<Array2<f64>> {
    let fit = dds.require_fit()?;
    let dispersions = robust_method_of_moments_disp(dds)?;
    let counts = dds.counts().counts();
    let p = dds.design().n_coefs() as f64;
    let (n_genes, n_samples) = (dds.n_genes(), dds.n_samples());

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            (0..n_samples)
                .map(|j| {
                    let mu = fit.mu[[i, j]];
                    let h = fit.hat_diagonals[[i, j]];
                    let variance = nb_variance(mu, dispersions[i]);
                    if variance <= 0.0 || !h.is_finite() || h >= 1.0 {
                        return f64::NAN;
                    }
                    let pearson_sq = (counts[[i, j]] - mu).powi(2) / variance;
                    pearson_sq / p * h / (1.0 - h).powi(2)
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((n_genes, n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            cooks[[i, j]] = v;
        }
    }
    Ok(cooks)
}

/// Per gene, the largest Cook's distance and its sample over samples in
/// replicated cells; `None` when no cell is replicated enough
pub fn max_cooks(dds: &CountDataSet, cooks: &Array2<f64>) -> Vec<Option<(f64, usize)>> {
    let replicated = replicated_cells(dds);
    let eligible: Vec<usize> = replicated.into_iter().flatten().collect();
    cooks
        .rows()
        .into_iter()
        .map(|row| {
            eligible
                .iter()
                .filter(|&&j| row[j].is_finite())
                .map(|&j| (row[j], j))
                .max_by(|a, b| a.0.total_cmp(&b.0))
        })
        .collect()
}

/// Record maximum Cook's distances in `results` and drop the p-values of
/// genes above `cutoff`.
///
/// For a two-level factor, a gene is kept when at least three samples have
/// higher counts than the outlying one. Returns the number of genes flagged.
pub fn apply_cooks_filter(dds: &CountDataSet, results: &mut DeResults, cutoff: f64) -> Result<usize> {
    let cooks = calculate(dds)?;
    let maxima = max_cooks(dds, &cooks);
    let counts = dds.counts().counts();
    let two_level = dds.design().info.levels.len() == 2;

    let mut flagged = 0;
    for (i, max) in maxima.into_iter().enumerate() {
        let Some((value, sample)) = max else {
            results.max_cooks[i] = f64::NAN;
            continue;
        };
        results.max_cooks[i] = value;
        if value <= cutoff {
            continue;
        }
        let higher = counts.row(i).iter().filter(|&&c| c > counts[[i, sample]]).count();
        if two_level && higher >= 3 {
            continue;
        }
        results.pvalues[i] = f64::NAN;
        results.padj[i] = f64::NAN;
        flagged += 1;
    }
    if flagged > 0 {
        log::info!("{}: {} genes flagged by Cook's distance (cutoff {:.2})", results.name, flagged, cutoff);
    }
    Ok(flagged)
}
