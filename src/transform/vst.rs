//! Variance stabilizing transformation
//!
//! Maps normalized counts to a log2-like scale on which the variance no
//! longer depends on the mean, using the fitted dispersion trend.

use ndarray::Array2;

use crate::data::CountDataSet;
use crate::dispersion::{
    estimate_gene_dispersions, fit_dispersion_trend, DispersionParams, DispersionTrend, TrendFitMethod,
};
use crate::error::{PipelineError, Result};
use crate::glm::intercept_only;

/// Transformed genes x samples matrix
#[derive(Debug, Clone)]
pub struct VstResult {
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Trend the transformation was derived from
    pub trend: DispersionTrend,
}

/// `log2((1 + e + 2aq + 2 sqrt(aq (1 + e + aq))) / (4a))`
fn parametric_vst(q: f64, asympt_disp: f64, extra_pois: f64) -> f64 {
    let aq = asympt_disp * q;
    ((1.0 + extra_pois + 2.0 * aq + 2.0 * (aq * (1.0 + extra_pois + aq)).sqrt()) / (4.0 * asympt_disp)).log2()
}

/// `(2 asinh(sqrt(aq)) - ln a - ln 4) / ln 2` for a constant dispersion `a`
fn mean_vst(q: f64, alpha: f64) -> f64 {
    (2.0 * (alpha * q).sqrt().asinh() - alpha.ln() - 4.0_f64.ln()) / std::f64::consts::LN_2
}

/// Variance stabilizing transformation of the dataset's normalized counts.
///
/// `blind` re-estimates the trend under the intercept-only design so that
/// group differences do not inflate dispersions; otherwise the trend from
/// [`crate::dispersion::estimate_dispersions`] is used. A non-parametric
/// trend is summarized by its mean dispersion.
pub fn vst(dds: &CountDataSet, blind: bool, fit_type: TrendFitMethod) -> Result<VstResult> {
    let normalized = dds.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before the variance stabilizing transformation".to_string(),
    })?;

    let trend = if blind {
        let params = DispersionParams::default();
        let blind_dds = dds.with_design(intercept_only(dds.n_samples()))?;
        let gene_wise = estimate_gene_dispersions(&blind_dds, &params)?;
        let means = blind_dds.base_means()?.to_vec();
        fit_dispersion_trend(&means, &gene_wise.dispersions, fit_type, params.min_disp)?
    } else {
        dds.require_dispersions()?.trend.clone()
    };

    let data = match trend.parametric_coefficients() {
        Some((a0, a1)) => normalized.mapv(|q| parametric_vst(q, a0, a1)),
        None => {
            let means = dds.base_means()?.to_vec();
            let trended: Vec<f64> = trend
                .eval(&means)
                .into_iter()
                .zip(&means)
                .filter(|(d, m)| d.is_finite() && **m > 0.0)
                .map(|(d, _)| d)
                .collect();
            if trended.is_empty() {
                return Err(PipelineError::TrendFittingFailed {
                    reason: "no genes with a positive mean for the variance stabilizing transformation"
                        .to_string(),
                });
            }
            let alpha = trended.iter().sum::<f64>() / trended.len() as f64;
            log::debug!("VST with constant dispersion {:.4}", alpha);
            normalized.mapv(|q| mean_vst(q, alpha))
        }
    };

    log::info!("Variance stabilizing transformation ({:?} trend, blind={})", trend.method(), blind);
    Ok(VstResult {
        data,
        gene_ids: dds.counts().gene_ids().to_vec(),
        sample_ids: dds.counts().sample_ids().to_vec(),
        trend,
    })
}
