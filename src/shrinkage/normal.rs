//! Normal prior LFC shrinkage
//!
//! 1. Estimate a prior variance per coefficient by matching the weighted
//!    upper quantile of the MLE betas
//! 2. Refit the GLM with ridge penalty `lambda = 1 / prior variance`
//! 3. Replace LFC and SE with the refit; stat and p-values stay from the MLE

use std::f64::consts::{LN_2, LOG2_E};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::{fit_glm_with_prior, GlmFitParams};
use crate::io::DeResults;
use crate::stats::match_weighted_upper_quantile_for_variance;

/// Upper quantile of |beta| matched by the prior
pub const UPPER_QUANTILE: f64 = 0.05;

/// Prior variances (log2 scale) per coefficient; the intercept gets a
/// wide prior of `1e6`
pub fn beta_prior_variance(dds: &CountDataSet) -> Result<Vec<f64>> {
    let fit = dds.require_fit()?;
    let trended = &dds.require_dispersions()?.trended;
    let base_means = dds.base_means()?;
    let n_coefs = dds.design().n_coefs();

    // varlogk = 1 / baseMean + dispFit
    let nonzero: Vec<usize> = (0..dds.n_genes()).filter(|&i| base_means[i] > 0.0).collect();
    let weights: Vec<f64> = nonzero
        .iter()
        .map(|&i| 1.0 / (1.0 / base_means[i] + trended[i]))
        .collect();

    let mut variances = vec![1e6; n_coefs];
    for (k, variance) in variances.iter_mut().enumerate().skip(1) {
        let (betas, w): (Vec<f64>, Vec<f64>) = nonzero
            .iter()
            .zip(&weights)
            .map(|(&i, &w)| (fit.coefficients[[i, k]] * LOG2_E, w))
            .filter(|(b, w)| b.is_finite() && b.abs() < 10.0 && w.is_finite())
            .unzip();
        if !betas.is_empty() {
            *variance = match_weighted_upper_quantile_for_variance(&betas, &w, UPPER_QUANTILE);
        }
    }
    Ok(variances)
}

/// Shrink the log fold changes of coefficient `coef` in place
pub fn shrink(dds: &CountDataSet, results: &mut DeResults, coef: usize, params: &GlmFitParams) -> Result<()> {
    let n_coefs = dds.design().n_coefs();
    if coef == 0 || coef >= n_coefs {
        return Err(PipelineError::InvalidContrast {
            reason: format!("coefficient {} cannot be shrunk in a design with {} columns", coef, n_coefs),
        });
    }
    let variances = beta_prior_variance(dds)?;
    log::debug!(
        "beta prior variances: {}",
        variances.iter().map(|v| format!("{:.4}", v)).collect::<Vec<_>>().join(", ")
    );

    // lambda on the natural log scale
    let mut lambda: Vec<f64> = variances.iter().map(|v| 1.0 / v / (LN_2 * LN_2)).collect();
    lambda[0] = 1e-6 / (LN_2 * LN_2);

    let refit = fit_glm_with_prior(dds, &lambda, params)?;
    for i in 0..dds.n_genes() {
        let beta = refit.coefficients[[i, coef]];
        if results.base_means[i] > 0.0 && beta.is_finite() {
            results.log2_fold_changes[i] = beta * LOG2_E;
            results.lfc_se[i] = refit.standard_errors[[i, coef]] * LOG2_E;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fitted_dataset;
    use crate::testing::wald_test;

    #[test]
    fn test_prior_variance_reflects_effects() {
        let dds = fitted_dataset();
        let variances = beta_prior_variance(&dds).unwrap();
        assert_eq!(variances[0], 1e6);
        // a quarter of the genes carry |log2FC| = 2
        assert!(variances[1] > 0.1 && variances[1] < 10.0);
    }

    #[test]
    fn test_normal_shrinkage_shrinks() {
        let dds = fitted_dataset();
        let mut res = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        let mle = res.log2_fold_changes.clone();
        let stat = res.stat.clone();
        shrink(&dds, &mut res, 1, &GlmFitParams::default()).unwrap();
        for i in 0..res.n_genes() - 1 {
            assert!(res.log2_fold_changes[i].abs() <= mle[i].abs() + 1e-3, "gene {}", i);
            assert_eq!(res.stat[i], stat[i]);
        }
        assert!(res.log2_fold_changes[0] > 1.0);
        assert_eq!(res.log2_fold_changes[39], 0.0);
    }

    #[test]
    fn test_intercept_is_rejected() {
        let dds = fitted_dataset();
        let mut res = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        assert!(shrink(&dds, &mut res, 0, &GlmFitParams::default()).is_err());
    }
}
