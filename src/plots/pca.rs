//! Principal component analysis of transformed counts

use std::path::Path;

use ndarray::{Array2, ArrayView2, Axis};
use plotters::prelude::*;
use serde::Serialize;

use super::{padded_range, plot_error, GROUP_COLORS};
use crate::error::{PipelineError, Result};
use crate::linalg::symmetric_eigen;

/// First two principal components per sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    pub pc1: Vec<f64>,
    pub pc2: Vec<f64>,
    /// Fraction of variance explained by PC1 and PC2
    pub variance_explained: [f64; 2],
}

/// PCA over the `ntop` genes with the largest variance across samples;
/// genes are centered but not scaled
pub fn compute(data: ArrayView2<'_, f64>, sample_ids: &[String], ntop: usize) -> Result<PcaResult> {
    let (n_genes, n_samples) = data.dim();
    if n_samples < 2 || n_genes == 0 {
        return Err(PipelineError::InvalidInput {
            reason: format!("PCA needs at least two samples and one gene, got {} x {}", n_genes, n_samples),
        });
    }
    let variance = |i: usize| -> f64 {
        let row = data.row(i);
        let mean = row.sum() / n_samples as f64;
        row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n_samples - 1) as f64
    };
    let mut genes: Vec<(usize, f64)> = (0..n_genes).map(|i| (i, variance(i))).collect();
    genes.sort_by(|a, b| b.1.total_cmp(&a.1));
    genes.truncate(ntop.max(1));

    // samples x selected genes, centered per gene
    let mut x = Array2::zeros((n_samples, genes.len()));
    for (col, &(i, _)) in genes.iter().enumerate() {
        let mean = data.row(i).sum() / n_samples as f64;
        for j in 0..n_samples {
            x[[j, col]] = data[[i, j]] - mean;
        }
    }
    let gram = x.dot(&x.t()) / (n_samples - 1) as f64;
    let (values, vectors) = symmetric_eigen(&gram);
    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
    let score = |k: usize| -> Vec<f64> {
        let scale = (values[k].max(0.0) * (n_samples - 1) as f64).sqrt();
        vectors.index_axis(Axis(1), k).iter().map(|u| u * scale).collect()
    };
    let explained = |k: usize| if total > 0.0 { values[k].max(0.0) / total } else { 0.0 };

    Ok(PcaResult {
        sample_ids: sample_ids.to_vec(),
        pc1: score(0),
        pc2: score(1),
        variance_explained: [explained(0), explained(1)],
    })
}

/// PC1/PC2 scatter colored by `groups` (one label per sample)
pub fn plot(data: ArrayView2<'_, f64>, sample_ids: &[String], groups: &[String], ntop: usize, path: &Path) -> Result<PcaResult> {
    let pca = compute(data, sample_ids, ntop)?;
    let mut levels: Vec<&str> = groups.iter().map(String::as_str).collect();
    levels.sort_unstable();
    levels.dedup();

    let root = SVGBackend::new(path, (800, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption("PCA of variance-stabilized counts", ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(padded_range(pca.pc1.iter().copied()), padded_range(pca.pc2.iter().copied()))
        .map_err(|e| plot_error(path, e))?;
    chart
        .configure_mesh()
        .x_desc(format!("PC1 ({:.1}% variance)", 100.0 * pca.variance_explained[0]))
        .y_desc(format!("PC2 ({:.1}% variance)", 100.0 * pca.variance_explained[1]))
        .draw()
        .map_err(|e| plot_error(path, e))?;

    for (g, level) in levels.iter().enumerate() {
        let color = GROUP_COLORS[g % GROUP_COLORS.len()];
        let members: Vec<usize> = (0..groups.len()).filter(|&j| groups[j] == *level).collect();
        chart
            .draw_series(members.iter().map(|&j| Circle::new((pca.pc1[j], pca.pc2[j]), 7, color.filled())))
            .map_err(|e| plot_error(path, e))?
            .label(level.to_string())
            .legend(move |(x, y)| Circle::new((x, y), 6, color.filled()));
        chart
            .draw_series(members.iter().map(|&j| {
                Text::new(sample_ids[j].clone(), (pca.pc1[j], pca.pc2[j]), ("sans-serif", 12).into_font())
            }))
            .map_err(|e| plot_error(path, e))?;
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(|e| plot_error(path, e))?;
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(pca)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn data() -> Array2<f64> {
        // two groups separated along the first two genes
        array![
            [1.0, 1.2, 0.9, 5.0, 5.1, 4.8],
            [4.0, 4.1, 3.9, 1.0, 0.8, 1.1],
            [2.0, 2.0, 2.0, 2.0, 2.0, 2.0],
            [3.0, 3.5, 2.5, 3.1, 2.9, 3.0]
        ]
    }

    fn ids() -> Vec<String> {
        (1..=6).map(|i| format!("s{}", i)).collect()
    }

    #[test]
    fn test_pc1_separates_groups() {
        let pca = compute(data().view(), &ids(), 500).unwrap();
        assert!(pca.variance_explained[0] > 0.9);
        assert!(pca.variance_explained[0] + pca.variance_explained[1] <= 1.0 + 1e-9);
        let sign = pca.pc1[0].signum();
        assert!(pca.pc1[..3].iter().all(|v| v.signum() == sign));
        assert!(pca.pc1[3..].iter().all(|v| v.signum() == -sign));
        // scores are centered
        assert!(pca.pc1.iter().sum::<f64>().abs() < 1e-9);
    }

    #[test]
    fn test_plot_writes_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pca.svg");
        let groups: Vec<String> = ["ctrl", "ctrl", "ctrl", "sh", "sh", "sh"].iter().map(|s| s.to_string()).collect();
        plot(data().view(), &ids(), &groups, 2, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("PC1"));
    }

    #[test]
    fn test_single_sample_rejected() {
        let d = array![[1.0], [2.0]];
        assert!(compute(d.view(), &["s1".to_string()], 10).is_err());
    }
}
