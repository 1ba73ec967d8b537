//! SVG figures drawn with plotters

pub mod enrichment;
pub mod heatmap;
pub mod ma;
pub mod overlap;
pub mod pca;
pub mod volcano;

use std::ops::Range;
use std::path::Path;

use plotters::style::RGBColor;

use crate::error::PipelineError;

pub(crate) const UP: RGBColor = RGBColor(178, 24, 43);
pub(crate) const DOWN: RGBColor = RGBColor(33, 102, 172);
pub(crate) const NOT_SIGNIFICANT: RGBColor = RGBColor(170, 170, 170);

/// Qualitative colors for sample groups
pub(crate) const GROUP_COLORS: [RGBColor; 8] = [
    RGBColor(27, 158, 119),
    RGBColor(217, 95, 2),
    RGBColor(117, 112, 179),
    RGBColor(231, 41, 138),
    RGBColor(102, 166, 30),
    RGBColor(230, 171, 2),
    RGBColor(166, 118, 29),
    RGBColor(102, 102, 102),
];

pub(crate) fn plot_error<E: std::fmt::Display>(path: &Path, error: E) -> PipelineError {
    PipelineError::Plot {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

/// Range covering the finite `values` with 5% padding on each side
pub(crate) fn padded_range<I: IntoIterator<Item = f64>>(values: I) -> Range<f64> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 0.5 };
    (lo - pad)..(hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_range() {
        let r = padded_range([0.0, 10.0, f64::NAN]);
        assert!((r.start + 0.5).abs() < 1e-12 && (r.end - 10.5).abs() < 1e-12);
        assert_eq!(padded_range([3.0]), 2.5..3.5);
        assert_eq!(padded_range(Vec::new()), 0.0..1.0);
    }
}
