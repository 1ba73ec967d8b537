//! Enrichment figures: ORA dot plot and GSEA NES bar chart

use std::path::Path;

use plotters::prelude::*;

use super::{plot_error, DOWN, UP};
use crate::enrichment::{EnrichmentTerm, GseaTerm};
use crate::error::Result;

const LABEL_W: i32 = 340;
const PLOT_W: i32 = 420;
const ROW_H: i32 = 26;
const TOP: i32 = 60;

fn padj_color(padj: f64, lo: f64, hi: f64) -> RGBColor {
    // red for the smallest adjusted p-values, blue for the largest
    let t = if hi > lo { ((padj - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.0 };
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(mix(UP.0, DOWN.0), mix(UP.1, DOWN.1), mix(UP.2, DOWN.2))
}

fn truncate_label(label: &str, max: usize) -> String {
    if label.chars().count() <= max {
        label.to_string()
    } else {
        let mut s: String = label.chars().take(max - 3).collect();
        s.push_str("...");
        s
    }
}

/// Gene ratio (x) per term, dot size by overlap count, color by adjusted
/// p-value. At most `n` terms, in the given order.
pub fn dotplot(terms: &[EnrichmentTerm], n: usize, title: &str, path: &Path) -> Result<()> {
    let terms = &terms[..terms.len().min(n)];
    let rows = terms.len().max(1) as i32;
    let width = LABEL_W + PLOT_W + 60;
    let height = TOP + rows * ROW_H + 70;
    let max_ratio = terms.iter().map(|t| t.gene_ratio).fold(0.0, f64::max).max(1e-3) * 1.1;
    let max_count = terms.iter().map(|t| t.count).max().unwrap_or(1).max(1) as f64;
    let (lo, hi) = terms
        .iter()
        .map(|t| t.padj)
        .filter(|p| p.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p), hi.max(p)));

    let root = SVGBackend::new(path, (width as u32, height as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    root.draw(&Text::new(title.to_string(), (20, 20), ("sans-serif", 20).into_font().color(&BLACK)))
        .map_err(|e| plot_error(path, e))?;

    let axis_y = TOP + rows * ROW_H;
    root.draw(&PathElement::new(
        vec![(LABEL_W, TOP), (LABEL_W, axis_y), (LABEL_W + PLOT_W, axis_y)],
        BLACK.stroke_width(1),
    ))
    .map_err(|e| plot_error(path, e))?;
    for tick in 0..=4 {
        let value = max_ratio * tick as f64 / 4.0;
        let x = LABEL_W + (PLOT_W as f64 * tick as f64 / 4.0) as i32;
        root.draw(&Text::new(format!("{:.2}", value), (x - 10, axis_y + 8), ("sans-serif", 11).into_font().color(&BLACK)))
            .map_err(|e| plot_error(path, e))?;
    }
    root.draw(&Text::new("GeneRatio", (LABEL_W + PLOT_W / 2 - 30, axis_y + 30), ("sans-serif", 13).into_font().color(&BLACK)))
        .map_err(|e| plot_error(path, e))?;

    for (r, term) in terms.iter().enumerate() {
        let cy = TOP + r as i32 * ROW_H + ROW_H / 2;
        root.draw(&Text::new(
            truncate_label(&term.name, 48),
            (10, cy - 6),
            ("sans-serif", 12).into_font().color(&BLACK),
        ))
        .map_err(|e| plot_error(path, e))?;
        let cx = LABEL_W + (term.gene_ratio / max_ratio * PLOT_W as f64) as i32;
        let radius = (4.0 + 8.0 * (term.count as f64 / max_count).sqrt()).round() as i32;
        root.draw(&Circle::new((cx, cy), radius, padj_color(term.padj, lo, hi).filled()))
            .map_err(|e| plot_error(path, e))?;
    }
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(())
}

/// Horizontal NES bars for at most `n` terms
pub fn gsea_barplot(terms: &[GseaTerm], n: usize, title: &str, path: &Path) -> Result<()> {
    let terms: Vec<&GseaTerm> = terms.iter().filter(|t| t.nes.is_finite()).take(n).collect();
    let rows = terms.len().max(1) as i32;
    let width = LABEL_W + PLOT_W + 60;
    let height = TOP + rows * ROW_H + 70;
    let extent = terms.iter().map(|t| t.nes.abs()).fold(1.0, f64::max) * 1.1;
    let zero_x = LABEL_W + PLOT_W / 2;
    let to_x = |v: f64| zero_x + (v / extent * (PLOT_W / 2) as f64) as i32;

    let root = SVGBackend::new(path, (width as u32, height as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    root.draw(&Text::new(title.to_string(), (20, 20), ("sans-serif", 20).into_font().color(&BLACK)))
        .map_err(|e| plot_error(path, e))?;

    for (r, term) in terms.iter().enumerate() {
        let y = TOP + r as i32 * ROW_H;
        root.draw(&Text::new(
            truncate_label(&term.name, 48),
            (10, y + 6),
            ("sans-serif", 12).into_font().color(&BLACK),
        ))
        .map_err(|e| plot_error(path, e))?;
        let (x0, x1) = if term.nes >= 0.0 { (zero_x, to_x(term.nes)) } else { (to_x(term.nes), zero_x) };
        let color = if term.nes >= 0.0 { UP } else { DOWN };
        root.draw(&Rectangle::new([(x0, y + 4), (x1, y + ROW_H - 4)], color.filled()))
            .map_err(|e| plot_error(path, e))?;
    }

    let axis_y = TOP + rows * ROW_H;
    root.draw(&PathElement::new(vec![(zero_x, TOP), (zero_x, axis_y)], BLACK.stroke_width(1)))
        .map_err(|e| plot_error(path, e))?;
    root.draw(&PathElement::new(vec![(LABEL_W, axis_y), (LABEL_W + PLOT_W, axis_y)], BLACK.stroke_width(1)))
        .map_err(|e| plot_error(path, e))?;
    for v in [-extent, 0.0, extent] {
        root.draw(&Text::new(format!("{:.1}", v), (to_x(v) - 10, axis_y + 8), ("sans-serif", 11).into_font().color(&BLACK)))
            .map_err(|e| plot_error(path, e))?;
    }
    root.draw(&Text::new("NES", (zero_x - 10, axis_y + 30), ("sans-serif", 13).into_font().color(&BLACK)))
        .map_err(|e| plot_error(path, e))?;
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ora_term(name: &str, count: usize, padj: f64) -> EnrichmentTerm {
        EnrichmentTerm {
            name: name.to_string(),
            description: String::new(),
            count,
            query_size: 40,
            set_size: 100,
            universe_size: 5000,
            gene_ratio: count as f64 / 40.0,
            bg_ratio: 0.02,
            pvalue: padj / 10.0,
            padj,
            genes: Vec::new(),
        }
    }

    #[test]
    fn test_padj_color_endpoints() {
        assert_eq!(padj_color(0.001, 0.001, 0.05), UP);
        assert_eq!(padj_color(0.05, 0.001, 0.05), DOWN);
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("SHORT", 10), "SHORT");
        assert_eq!(truncate_label("HALLMARK_OXIDATIVE", 10), "HALLMAR...");
    }

    #[test]
    fn test_dotplot_and_barplot() {
        let dir = tempdir().unwrap();
        let terms = vec![ora_term("HALLMARK_P53_PATHWAY", 12, 1e-5), ora_term("KEGG_CELL_CYCLE", 5, 0.03)];
        let dot = dir.path().join("dot.svg");
        dotplot(&terms, 20, "shA up", &dot).unwrap();
        assert!(std::fs::read_to_string(&dot).unwrap().contains("HALLMARK_P53_PATHWAY"));

        let gsea = vec![
            GseaTerm {
                name: "UP_SET".into(),
                description: String::new(),
                set_size: 20,
                es: 0.7,
                nes: 2.1,
                pvalue: 0.001,
                padj: 0.01,
                leading_edge: Vec::new(),
            },
            GseaTerm {
                name: "DOWN_SET".into(),
                description: String::new(),
                set_size: 20,
                es: -0.6,
                nes: -1.8,
                pvalue: 0.002,
                padj: 0.01,
                leading_edge: Vec::new(),
            },
        ];
        let bar = dir.path().join("bar.svg");
        gsea_barplot(&gsea, 20, "GSEA", &bar).unwrap();
        let svg = std::fs::read_to_string(&bar).unwrap();
        assert!(svg.contains("UP_SET") && svg.contains("DOWN_SET"));
    }
}
