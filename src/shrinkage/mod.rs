//! Log fold change shrinkage
//!
//! - `apeglm`: Cauchy prior on the fold change, Laplace posterior SDs and s-values
//! - `normal`: zero-centered normal prior fitted to the MLE fold changes

pub mod apeglm;
pub mod normal;

use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::GlmFitParams;
use crate::io::DeResults;

/// Shrinkage estimator applied to reported fold changes
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShrinkageMethod {
    #[default]
    Apeglm,
    Normal,
    None,
}

impl ShrinkageMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ShrinkageMethod::Apeglm => "apeglm",
            ShrinkageMethod::Normal => "normal",
            ShrinkageMethod::None => "none",
        }
    }
}

/// Coefficient holding `numerator` vs the reference level.
///
/// Shrinkage acts on a single coefficient, so the denominator must be the
/// design's reference level.
pub fn coefficient_for(dds: &CountDataSet, numerator: &str, denominator: &str) -> Result<usize> {
    let info = &dds.design().info;
    if denominator != info.reference_level {
        return Err(PipelineError::InvalidContrast {
            reason: format!(
                "shrinking {} vs {} needs '{}' as the reference level (currently '{}')",
                numerator, denominator, denominator, info.reference_level
            ),
        });
    }
    info.level_column(numerator).ok_or_else(|| PipelineError::InvalidContrast {
        reason: format!("'{}' is not a non-reference level of '{}'", numerator, info.factor),
    })
}

/// Shrink the fold changes of `results` in place with `method`
pub fn shrink(dds: &CountDataSet, results: &mut DeResults, method: ShrinkageMethod) -> Result<()> {
    if method == ShrinkageMethod::None {
        return Ok(());
    }
    let coef = coefficient_for(dds, &results.numerator, &results.denominator)?;
    log::info!("{}: shrinking log2 fold changes ({})", results.name, method.name());
    match method {
        ShrinkageMethod::Apeglm => apeglm::shrink(dds, results, coef, &apeglm::ApeglmParams::default())?,
        ShrinkageMethod::Normal => normal::shrink(dds, results, coef, &GlmFitParams::default())?,
        ShrinkageMethod::None => {}
    }
    results.shrinkage = Some(method.name().to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fitted_dataset;
    use crate::testing::wald_test;

    #[test]
    fn test_coefficient_lookup() {
        let dds = fitted_dataset();
        assert_eq!(coefficient_for(&dds, "b", "a").unwrap(), 1);
        assert!(coefficient_for(&dds, "a", "b").is_err());
    }

    #[test]
    fn test_reversed_shrunk_results_negate() {
        let dds = fitted_dataset();
        let mut forward = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        shrink(&dds, &mut forward, ShrinkageMethod::Apeglm).unwrap();
        assert_eq!(forward.shrinkage.as_deref(), Some("apeglm"));
        let backward = forward.reversed("a_vs_b");
        for i in 0..forward.n_genes() {
            assert_eq!(backward.log2_fold_changes[i], -forward.log2_fold_changes[i]);
        }
        assert_eq!(backward.numerator, "a");
    }

    #[test]
    fn test_none_leaves_mle() {
        let dds = fitted_dataset();
        let mut res = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        let mle = res.log2_fold_changes.clone();
        shrink(&dds, &mut res, ShrinkageMethod::None).unwrap();
        assert_eq!(res.log2_fold_changes, mle);
        assert!(res.shrinkage.is_none());
    }

    #[test]
    fn test_serde_names() {
        let m: ShrinkageMethod = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(m, ShrinkageMethod::Normal);
    }
}
