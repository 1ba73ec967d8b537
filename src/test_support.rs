//! Synthetic datasets shared by unit tests

use std::path::Path;

use ndarray::Array2;

use crate::data::{CountDataSet, CountMatrix, SampleMetadata};
use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
use crate::glm::{fit_glm, GlmFitParams};
use crate::normalization::estimate_size_factors;

const NOISE: [f64; 6] = [0.8, 1.15, 1.05, 0.88, 1.2, 0.92];

/// 40 genes x 6 samples, groups `a` (first three) and `b`.
///
/// Genes 0-4 are 4-fold up in `b`, genes 5-9 4-fold down, the last gene
/// has only zero counts.
pub(crate) fn synthetic_counts() -> CountMatrix {
    let n_genes = 40;
    let samples: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
    let mut counts = Array2::zeros((n_genes, 6));
    for g in 0..n_genes {
        let base = 30.0 + 25.0 * g as f64;
        let fold = match g {
            0..=4 => 4.0,
            5..=9 => 0.25,
            _ => 1.0,
        };
        for j in 0..6 {
            let mean = if j < 3 { base } else { base * fold };
            counts[[g, j]] = (mean * NOISE[(j + g) % 6]).round();
        }
    }
    counts.row_mut(n_genes - 1).fill(0.0);
    let genes = (0..n_genes).map(|g| format!("g{}", g)).collect();
    CountMatrix::new(counts, genes, samples).unwrap()
}

pub(crate) fn synthetic_metadata() -> SampleMetadata {
    let mut meta = SampleMetadata::new((1..=6).map(|i| format!("s{}", i)).collect());
    meta.add_condition("group", ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect())
        .unwrap();
    meta
}

/// Synthetic dataset with size factors, dispersions and the GLM fitted
pub(crate) fn fitted_dataset() -> CountDataSet {
    let mut dds = CountDataSet::with_factor(synthetic_counts(), synthetic_metadata(), "group", Some("a")).unwrap();
    estimate_size_factors(&mut dds).unwrap();
    estimate_dispersions(&mut dds, TrendFitMethod::Parametric, &DispersionParams::default()).unwrap();
    fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
    dds
}

/// Write `dir/<sample>/quant.sf` from `(name, effective length, TPM, reads)`
/// rows; lengths are the effective length plus 100
pub(crate) fn write_quant(dir: &Path, sample: &str, rows: &[(&str, f64, f64, f64)]) {
    let sample_dir = dir.join(sample);
    std::fs::create_dir_all(&sample_dir).unwrap();
    let mut text = "Name\tLength\tEffectiveLength\tTPM\tNumReads\n".to_string();
    for (name, eff, tpm, reads) in rows {
        text.push_str(&format!("{}\t{}\t{}\t{}\t{}\n", name, eff + 100.0, eff, tpm, reads));
    }
    std::fs::write(sample_dir.join("quant.sf"), text).unwrap();
}
