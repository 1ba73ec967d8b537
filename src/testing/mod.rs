//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue;
pub use wald::wald_test;

use crate::data::CountDataSet;
use crate::error::Result;
use crate::filter::{cooks, independent_filtering};
use crate::io::DeResults;

/// Post-test options for [`results`]
#[derive(Debug, Clone)]
pub struct ResultsParams {
    /// Target FDR for independent filtering
    pub alpha: f64,
    pub independent_filtering: bool,
    pub cooks_filter: bool,
    /// Overrides `qf(0.99, p, m - p)`
    pub cooks_cutoff: Option<f64>,
}

impl Default for ResultsParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            independent_filtering: true,
            cooks_filter: true,
            cooks_cutoff: None,
        }
    }
}

/// Wald test of `numerator` vs `denominator` followed by Cook's outlier
/// flagging and independent filtering (or plain BH when disabled)
pub fn results(
    dds: &CountDataSet,
    name: &str,
    numerator: &str,
    denominator: &str,
    params: &ResultsParams,
) -> Result<DeResults> {
    let mut res = wald_test(dds, name, numerator, denominator)?;

    if params.cooks_filter {
        let cutoff = params
            .cooks_cutoff
            .unwrap_or_else(|| cooks::default_cutoff(dds.n_samples(), dds.design().n_coefs()));
        cooks::apply_cooks_filter(dds, &mut res, cutoff)?;
    }

    if params.independent_filtering {
        if let Some(threshold) = independent_filtering(&mut res, params.alpha) {
            log::info!(
                "{}: independent filtering removed genes with base mean < {:.2} ({} rejections at alpha {})",
                name,
                threshold.cutoff,
                threshold.rejections,
                params.alpha
            );
        }
    } else {
        res.padj = benjamini_hochberg(&res.pvalues);
    }
    Ok(res)
}
