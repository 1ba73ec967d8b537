//! Dispersion estimation for negative binomial models
//!
//! Three steps: gene-wise maximum likelihood (Cox-Reid adjusted), a
//! mean-dispersion trend across genes, and maximum a posteriori shrinkage of
//! the gene-wise values toward that trend.

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_gene_dispersions, GeneWiseDispersions};
pub use map::{estimate_map_dispersions, estimate_prior_variance};
pub use trend::fit_dispersion_trend;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::local_quadratic;

/// Span of the local dispersion trend
pub(crate) const LOCAL_SPAN: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendFitMethod {
    /// `alpha = a0 + a1 / mean`, falling back to local regression
    #[default]
    Parametric,
    /// Local quadratic regression of log dispersion on log mean
    Local,
    /// A single trimmed mean across genes
    Mean,
}

#[derive(Debug, Clone)]
pub struct DispersionParams {
    pub min_disp: f64,
    /// Convergence tolerance on the log posterior
    pub disp_tol: f64,
    /// Initial step size of the line search
    pub kappa_0: f64,
    pub maxit: usize,
    /// Gene-wise estimates this many prior SDs above the trend are kept
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Fitted mean-dispersion relationship
#[derive(Debug, Clone, PartialEq)]
pub enum DispersionTrend {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// Support points of the local fit (log scale) with their weights
    Local {
        log_means: Vec<f64>,
        log_dispersions: Vec<f64>,
        weights: Vec<f64>,
    },
    Mean(f64),
}

impl DispersionTrend {
    /// Trended dispersion at each mean of normalized counts
    pub fn eval(&self, means: &[f64]) -> Vec<f64> {
        match self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => means
                .iter()
                .map(|&m| {
                    if m > 0.0 {
                        asympt_disp + extra_pois / m
                    } else {
                        *asympt_disp
                    }
                })
                .collect(),
            DispersionTrend::Local {
                log_means,
                log_dispersions,
                weights,
            } => {
                let (lo, hi) = log_means
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
                let at: Vec<f64> = means
                    .iter()
                    .map(|&m| if m > 0.0 { m.ln().clamp(lo, hi) } else { lo })
                    .collect();
                local_quadratic(log_means, log_dispersions, weights, &at, LOCAL_SPAN)
                    .into_iter()
                    .map(f64::exp)
                    .collect()
            }
            DispersionTrend::Mean(d) => vec![*d; means.len()],
        }
    }

    /// `(asymptDisp, extraPois)` when the trend is parametric
    pub fn parametric_coefficients(&self) -> Option<(f64, f64)> {
        match self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => Some((*asympt_disp, *extra_pois)),
            _ => None,
        }
    }

    pub fn method(&self) -> TrendFitMethod {
        match self {
            DispersionTrend::Parametric { .. } => TrendFitMethod::Parametric,
            DispersionTrend::Local { .. } => TrendFitMethod::Local,
            DispersionTrend::Mean(_) => TrendFitMethod::Mean,
        }
    }
}

/// Everything produced by [`estimate_dispersions`]
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub gene_wise: Array1<f64>,
    pub trended: Array1<f64>,
    /// MAP estimates, or the gene-wise value for upper outliers
    pub final_dispersions: Array1<f64>,
    pub trend: DispersionTrend,
    pub prior_var: f64,
    pub var_log_disp_ests: f64,
    /// Genes whose gene-wise estimate was kept because it sits far above the trend
    pub outliers: Vec<bool>,
    /// Fitted means used during gene-wise estimation
    pub mu: Array2<f64>,
    pub gene_converged: Vec<bool>,
}

/// Gene-wise, trend and MAP dispersions for the dataset's design
pub fn estimate_dispersions(
    dds: &mut CountDataSet,
    fit_type: TrendFitMethod,
    params: &DispersionParams,
) -> Result<()> {
    let design = dds.design_matrix();
    if design.nrows() <= design.ncols() {
        return Err(PipelineError::DispersionEstimationFailed {
            reason: format!(
                "design has {} coefficients for {} samples; no replicates to estimate dispersion",
                design.ncols(),
                design.nrows()
            ),
        });
    }

    log::info!("Estimating gene-wise dispersions for {} genes", dds.n_genes());
    let gene_wise = estimate_gene_dispersions(dds, params)?;

    let means = dds.base_means()?.to_vec();
    let trend = fit_dispersion_trend(&means, &gene_wise.dispersions, fit_type, params.min_disp)?;
    let trended = Array1::from_vec(trend.eval(&means));
    log::info!("Dispersion trend: {:?}", trend.method());

    let estimates = estimate_map_dispersions(dds, gene_wise, trend, trended, params)?;
    log::info!(
        "MAP dispersions: prior variance {:.4}, {} upper outliers",
        estimates.prior_var,
        estimates.outliers.iter().filter(|o| **o).count()
    );
    dds.set_dispersions(estimates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_trend_eval() {
        let trend = DispersionTrend::Parametric {
            asympt_disp: 0.1,
            extra_pois: 2.0,
        };
        let v = trend.eval(&[1.0, 10.0, 0.0]);
        assert!((v[0] - 2.1).abs() < 1e-12);
        assert!((v[1] - 0.3).abs() < 1e-12);
        assert!((v[2] - 0.1).abs() < 1e-12);
        assert_eq!(trend.parametric_coefficients(), Some((0.1, 2.0)));
    }

    #[test]
    fn test_mean_trend_is_constant() {
        let trend = DispersionTrend::Mean(0.05);
        assert_eq!(trend.eval(&[1.0, 1000.0]), vec![0.05, 0.05]);
        assert_eq!(trend.method(), TrendFitMethod::Mean);
        assert!(trend.parametric_coefficients().is_none());
    }

    #[test]
    fn test_fit_type_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            fit: TrendFitMethod,
        }
        let w: Wrapper = toml::from_str("fit = \"local\"").unwrap();
        assert_eq!(w.fit, TrendFitMethod::Local);
    }
}
