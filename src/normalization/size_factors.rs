//! Size factors by the median-of-ratios method, and gene-level
//! normalization factors from average transcript lengths

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::median;

/// Median-of-ratios size factors.
///
/// Each sample's factor is the median, over genes with no zero count, of
/// its count divided by the gene's geometric mean.
pub fn estimate_size_factors(dds: &mut CountDataSet) -> Result<()> {
    let counts = dds.counts().counts();
    let log_geo_means = log_geometric_means(counts);
    let size_factors = size_factors_for_matrix(counts, &log_geo_means)?;
    log::info!(
        "Size factors: {}",
        size_factors
            .iter()
            .map(|s| format!("{:.3}", s))
            .collect::<Vec<_>>()
            .join(", ")
    );
    dds.set_size_factors(size_factors)
}

/// Normalization factors combining library size with per-gene length
/// offsets (genes x samples average transcript lengths).
pub fn estimate_normalization_factors(dds: &mut CountDataSet, lengths: &Array2<f64>) -> Result<()> {
    let counts = dds.counts().counts();
    if lengths.dim() != counts.dim() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} x {} length matrix", counts.nrows(), counts.ncols()),
            got: format!("{} x {}", lengths.nrows(), lengths.ncols()),
        });
    }
    if lengths.iter().any(|&l| !l.is_finite() || l <= 0.0) {
        return Err(PipelineError::SizeFactorFailed {
            reason: "average transcript lengths must be positive".to_string(),
        });
    }

    let norm_matrix = center_rows(lengths.clone());
    let length_normalized = &counts / &norm_matrix;
    let log_geo_means = log_geometric_means(length_normalized.view());
    let size_factors = size_factors_for_matrix(length_normalized.view(), &log_geo_means)?;

    let mut nf = norm_matrix;
    for (mut col, &sf) in nf.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        col.mapv_inplace(|v| v * sf);
    }
    let nf = center_rows(nf);
    log::info!("Normalization factors from average transcript lengths");
    dds.set_normalization_factors(nf, size_factors)
}

/// Divide each row by its geometric mean
fn center_rows(mut m: Array2<f64>) -> Array2<f64> {
    for mut row in m.axis_iter_mut(Axis(0)) {
        let center = (row.iter().map(|v| v.ln()).sum::<f64>() / row.len() as f64).exp();
        if center > 0.0 && center.is_finite() {
            row.mapv_inplace(|v| v / center);
        }
    }
    m
}

/// Row means of log counts; `-inf` for rows with any zero
fn log_geometric_means(counts: ArrayView2<'_, f64>) -> Vec<f64> {
    counts
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|v| v.ln()).sum::<f64>() / row.len() as f64)
        .collect()
}

fn size_factors_for_matrix(counts: ArrayView2<'_, f64>, log_geo_means: &[f64]) -> Result<Array1<f64>> {
    if log_geo_means.iter().all(|g| !g.is_finite()) {
        return Err(PipelineError::SizeFactorFailed {
            reason: "every gene contains at least one zero, cannot compute log geometric means"
                .to_string(),
        });
    }

    let mut size_factors = Array1::zeros(counts.ncols());
    for (j, col) in counts.axis_iter(Axis(1)).enumerate() {
        let log_ratios: Vec<f64> = col
            .iter()
            .zip(log_geo_means)
            .filter(|(&c, g)| g.is_finite() && c > 0.0)
            .map(|(&c, &g)| c.ln() - g)
            .collect();
        let sf = median(&log_ratios).exp();
        if !sf.is_finite() || sf <= 0.0 {
            return Err(PipelineError::SizeFactorFailed {
                reason: format!("no usable genes for sample {}", j),
            });
        }
        size_factors[j] = sf;
    }
    Ok(size_factors)
}
