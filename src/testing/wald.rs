//! Wald test of a contrast between two levels of the design factor

use std::f64::consts::LN_2;

use super::fdr::benjamini_hochberg;
use super::pvalue::calculate_pvalue;
use crate::data::CountDataSet;
use crate::error::Result;
use crate::glm::contrast_vector;
use crate::io::DeResults;
use crate::linalg::quadratic_form;

/// Wald test of `numerator` vs `denominator`.
///
/// `log2FC = c'b / ln 2`, `lfcSE = sqrt(c'Sc) / ln 2` and `stat = c'b / sqrt(c'Sc)`
/// with two-sided normal p-values and plain BH adjustment. Genes with a base
/// mean of zero get LFC 0, SE 0 and no statistic.
pub fn wald_test(dds: &CountDataSet, name: &str, numerator: &str, denominator: &str) -> Result<DeResults> {
    let fit = dds.require_fit()?;
    let info = &dds.design().info;
    let contrast = contrast_vector(info, numerator, denominator)?;
    let base_means = dds.base_means()?;
    let dispersions = &dds.require_dispersions()?.final_dispersions;

    let mut results = DeResults::new(name, &info.factor, numerator, denominator, dds.counts().gene_ids().to_vec());
    for i in 0..dds.n_genes() {
        results.base_means[i] = base_means[i];
        results.dispersions[i] = dispersions[i];
        if base_means[i] == 0.0 {
            results.log2_fold_changes[i] = 0.0;
            results.lfc_se[i] = 0.0;
            continue;
        }
        let beta = fit.coefficients.row(i);
        let estimate: f64 = contrast.iter().zip(beta.iter()).map(|(c, b)| c * b).sum();
        let variance = quadratic_form(&fit.covariance(i), &contrast);
        let se = if variance > 0.0 { variance.sqrt() } else { f64::NAN };

        results.log2_fold_changes[i] = estimate / LN_2;
        results.lfc_se[i] = se / LN_2;
        results.stat[i] = estimate / se;
        results.pvalues[i] = calculate_pvalue(results.stat[i]);
    }
    results.padj = benjamini_hochberg(&results.pvalues);

    log::debug!(
        "Wald test {}: {} genes with a p-value",
        name,
        results.pvalues.iter().filter(|p| p.is_finite()).count()
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fitted_dataset;

    #[test]
    fn test_detects_fold_changes() {
        let dds = fitted_dataset();
        let res = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        for g in 0..5 {
            assert!((res.log2_fold_changes[g] - 2.0).abs() < 0.3, "gene {}", g);
            assert!(res.pvalues[g] < 1e-3);
        }
        for g in 5..10 {
            assert!((res.log2_fold_changes[g] + 2.0).abs() < 0.3, "gene {}", g);
        }
        assert!(res.log2_fold_changes[20].abs() < 0.5);
    }

    #[test]
    fn test_all_zero_gene() {
        let dds = fitted_dataset();
        let res = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        let last = res.n_genes() - 1;
        assert_eq!(res.log2_fold_changes[last], 0.0);
        assert_eq!(res.lfc_se[last], 0.0);
        assert!(res.stat[last].is_nan());
        assert!(res.pvalues[last].is_nan());
    }

    #[test]
    fn test_reversed_contrast_negates() {
        let dds = fitted_dataset();
        let forward = wald_test(&dds, "b_vs_a", "b", "a").unwrap();
        let backward = wald_test(&dds, "a_vs_b", "a", "b").unwrap();
        for i in 0..forward.n_genes() - 1 {
            assert!((forward.log2_fold_changes[i] + backward.log2_fold_changes[i]).abs() < 1e-12);
            assert!((forward.stat[i] + backward.stat[i]).abs() < 1e-12);
            assert!((forward.pvalues[i] - backward.pvalues[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unknown_level() {
        let dds = fitted_dataset();
        assert!(wald_test(&dds, "x", "c", "a").is_err());
    }
}
