//! Volcano plot: log2 fold change vs -log10 adjusted p-value

use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_error, DOWN, NOT_SIGNIFICANT, UP};
use crate::annotation::Thresholds;
use crate::error::Result;
use crate::io::DeResults;

/// Smallest adjusted p-value drawn; lower values are capped
const MIN_PADJ: f64 = 1e-300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regulation {
    Up,
    Down,
    NotSignificant,
}

pub fn classify(lfc: f64, padj: f64, thresholds: &Thresholds) -> Regulation {
    if !thresholds.is_significant(lfc, padj) {
        Regulation::NotSignificant
    } else if lfc > 0.0 {
        Regulation::Up
    } else {
        Regulation::Down
    }
}

/// Significant genes with the smallest adjusted p-values, at most `n`
pub fn top_genes(results: &DeResults, thresholds: &Thresholds, n: usize) -> Vec<usize> {
    let mut genes: Vec<usize> = (0..results.n_genes())
        .filter(|&i| thresholds.is_significant(results.log2_fold_changes[i], results.padj[i]))
        .collect();
    genes.sort_by(|&a, &b| results.padj[a].total_cmp(&results.padj[b]));
    genes.truncate(n);
    genes
}

pub fn plot(results: &DeResults, thresholds: &Thresholds, n_labels: usize, path: &Path) -> Result<()> {
    let points: Vec<(f64, f64, Regulation)> = (0..results.n_genes())
        .filter(|&i| results.padj[i].is_finite() && results.log2_fold_changes[i].is_finite())
        .map(|i| {
            let lfc = results.log2_fold_changes[i];
            let padj = results.padj[i];
            (lfc, -padj.max(MIN_PADJ).log10(), classify(lfc, padj, thresholds))
        })
        .collect();

    let x_extent = points
        .iter()
        .map(|p| p.0.abs())
        .fold(thresholds.lfc + 1.0, f64::max);
    let y_range = padded_range(points.iter().map(|p| p.1).chain([0.0, -thresholds.padj.log10()]));

    let root = SVGBackend::new(path, (800, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{}: volcano plot", results.name), ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(-x_extent * 1.05..x_extent * 1.05, 0.0_f64.min(y_range.start)..y_range.end)
        .map_err(|e| plot_error(path, e))?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10 adjusted p-value")
        .draw()
        .map_err(|e| plot_error(path, e))?;

    for (kind, color, label) in [
        (Regulation::NotSignificant, NOT_SIGNIFICANT, "not significant"),
        (Regulation::Down, DOWN, "down"),
        (Regulation::Up, UP, "up"),
    ] {
        let count = points.iter().filter(|p| p.2 == kind).count();
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == kind)
                    .map(|p| Circle::new((p.0, p.1), 3, color.filled())),
            )
            .map_err(|e| plot_error(path, e))?
            .label(format!("{} ({})", label, count))
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    let y_line = -thresholds.padj.log10();
    let grey = RGBColor(90, 90, 90);
    let (y0, y1) = (0.0_f64.min(y_range.start), y_range.end);
    for series in [
        vec![(-x_extent * 1.05, y_line), (x_extent * 1.05, y_line)],
        vec![(thresholds.lfc, y0), (thresholds.lfc, y1)],
        vec![(-thresholds.lfc, y0), (-thresholds.lfc, y1)],
    ] {
        chart
            .draw_series(LineSeries::new(series, grey.stroke_width(1)))
            .map_err(|e| plot_error(path, e))?;
    }

    chart
        .draw_series(top_genes(results, thresholds, n_labels).into_iter().map(|i| {
            let label = if results.symbols[i].is_empty() {
                results.gene_ids[i].clone()
            } else {
                results.symbols[i].clone()
            };
            let y = -results.padj[i].max(MIN_PADJ).log10();
            Text::new(label, (results.log2_fold_changes[i], y), ("sans-serif", 12).into_font())
        }))
        .map_err(|e| plot_error(path, e))?;

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(|e| plot_error(path, e))?;
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn results() -> DeResults {
        let mut r = DeResults::new("shA_vs_control", "group", "shA", "control", (0..5).map(|i| format!("g{}", i)).collect());
        r.log2_fold_changes = vec![3.0, -4.0, 0.5, 2.5, f64::NAN];
        r.padj = vec![1e-10, 1e-4, 0.5, 0.2, f64::NAN];
        r.symbols = vec!["TP53".into(), String::new(), "A".into(), "B".into(), String::new()];
        r
    }

    #[test]
    fn test_classify_and_top_genes() {
        let t = Thresholds::default();
        assert_eq!(classify(3.0, 0.01, &t), Regulation::Up);
        assert_eq!(classify(-3.0, 0.01, &t), Regulation::Down);
        assert_eq!(classify(3.0, 0.2, &t), Regulation::NotSignificant);
        assert_eq!(top_genes(&results(), &t, 10), vec![0, 1]);
        assert_eq!(top_genes(&results(), &t, 1), vec![0]);
    }

    #[test]
    fn test_plot_labels_by_symbol() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volcano.svg");
        plot(&results(), &Thresholds::default(), 10, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("TP53"));
        // gene without a symbol falls back to its id
        assert!(svg.contains("g1"));
    }
}
