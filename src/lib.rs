//! rnaseq_de: knockdown RNA-seq differential expression in Rust
//!
//! Reads are fetched from SRA, quality-trimmed and quantified with salmon;
//! transcript estimates are summarized to genes and tested with a negative
//! binomial GLM (median-of-ratios normalization, empirical Bayes
//! dispersions, Wald tests, LFC shrinkage). Results are annotated with gene
//! symbols, tested for gene set enrichment and drawn as SVG figures.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_de::prelude::*;
//!
//! let counts = read_count_matrix("counts.tsv")?;
//! let sheet = SampleSheet::from_path("samples.tsv")?;
//! let mut dds = CountDataSet::with_factor(counts, sheet.metadata()?, "group", Some("control"))?;
//! run_de(&mut dds, TrendFitMethod::Parametric)?;
//! let res = results(&dds, "knockdown_vs_control", "knockdown", "control", &ResultsParams::default())?;
//! ```

pub mod annotation;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod linalg;
pub mod normalization;
pub mod pipeline;
pub mod plots;
pub mod qc;
pub mod quant;
pub mod shrinkage;
pub mod stats;
pub mod testing;
pub mod tools;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::annotation::{annotate, flag, SymbolMap, Thresholds};
    pub use crate::config::Config;
    pub use crate::data::{CountDataSet, CountMatrix, SampleMetadata, SampleSheet};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
    pub use crate::enrichment::{enrich, gsea, GeneSets};
    pub use crate::error::{PipelineError, Result};
    pub use crate::glm::{fit_glm, GlmFitParams};
    pub use crate::io::{read_count_matrix, write_results, DeResults};
    pub use crate::normalization::estimate_size_factors;
    pub use crate::pipeline::Pipeline;
    pub use crate::shrinkage::{shrink, ShrinkageMethod};
    pub use crate::testing::{results, wald_test, ResultsParams};
    pub use crate::transform::{vst, VstResult};
}

use prelude::*;

/// Size factors (unless already set), dispersions and the GLM fit
pub fn run_de(dds: &mut CountDataSet, fit_type: TrendFitMethod) -> Result<()> {
    if !dds.has_size_factors() {
        estimate_size_factors(dds)?;
    }
    estimate_dispersions(dds, fit_type, &DispersionParams::default())?;
    fit_glm(dds, &GlmFitParams::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    /// Replicate noise, so the counts are overdispersed
    const NOISE: [f64; 6] = [0.8, 1.15, 1.05, 0.88, 1.2, 0.92];

    #[test]
    fn test_full_modeling() {
        // (control mean, knockdown mean)
        let means = array![
            [100.0, 400.0],
            [500.0, 500.0],
            [300.0, 75.0],
            [50.0, 50.0],
            [200.0, 200.0],
            [150.0, 300.0],
            [400.0, 100.0],
            [80.0, 80.0],
            [600.0, 600.0],
            [250.0, 500.0],
        ];
        let raw = Array2::from_shape_fn((10, 6), |(g, j)| {
            let mean = if j < 3 { means[[g, 0]] } else { means[[g, 1]] };
            (mean * NOISE[(g + j) % 6]).round()
        });
        let counts = CountMatrix::new(
            raw,
            ["up1", "nc1", "down1", "nc2", "nc3", "up2", "down2", "nc4", "nc5", "up3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            (1..=6).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap();
        let mut metadata = SampleMetadata::new((1..=6).map(|i| format!("s{}", i)).collect());
        metadata
            .add_condition(
                "group",
                ["control", "control", "control", "kd", "kd", "kd"].iter().map(|s| s.to_string()).collect(),
            )
            .unwrap();

        let mut dds = CountDataSet::with_factor(counts, metadata, "group", Some("control")).unwrap();
        run_de(&mut dds, TrendFitMethod::Parametric).unwrap();
        let params = ResultsParams {
            independent_filtering: false,
            ..ResultsParams::default()
        };
        let mut res = results(&dds, "kd_vs_control", "kd", "control", &params).unwrap();

        for (i, expect_up) in [(0, true), (5, true), (9, true), (2, false), (6, false)] {
            assert!(res.padj[i] < 0.05, "gene {} padj {}", i, res.padj[i]);
            assert_eq!(res.log2_fold_changes[i] > 0.0, expect_up);
        }
        assert!((res.log2_fold_changes[0] - 2.0).abs() < 0.3);
        for i in [1, 3, 4, 7, 8] {
            assert!(res.log2_fold_changes[i].abs() < 0.3);
        }

        let mle = res.log2_fold_changes.clone();
        shrink(&dds, &mut res, ShrinkageMethod::Normal).unwrap();
        for i in 0..res.n_genes() {
            assert!(res.log2_fold_changes[i].abs() <= mle[i].abs() + 1e-3);
        }
        let n_flagged = flag(&mut res, &Thresholds { lfc: 1.0, padj: 0.05 });
        assert!(n_flagged >= 3);
    }
}
