//! MA plot: mean of normalized counts vs log2 fold change

use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_error, NOT_SIGNIFICANT, UP};
use crate::error::Result;
use crate::io::DeResults;

pub fn plot(results: &DeResults, path: &Path) -> Result<()> {
    let points: Vec<(f64, f64, bool)> = (0..results.n_genes())
        .filter(|&i| results.base_means[i] > 0.0 && results.log2_fold_changes[i].is_finite())
        .map(|i| (results.base_means[i].log10(), results.log2_fold_changes[i], results.significant[i]))
        .collect();
    let x_range = padded_range(points.iter().map(|p| p.0));
    let y_extent = points.iter().map(|p| p.1.abs()).fold(1.0, f64::max) * 1.05;

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{}: MA plot", results.name), ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(x_range.clone(), -y_extent..y_extent)
        .map_err(|e| plot_error(path, e))?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("log10 mean of normalized counts")
        .y_desc(match &results.shrinkage {
            Some(method) => format!("log2 fold change ({})", method),
            None => "log2 fold change".to_string(),
        })
        .draw()
        .map_err(|e| plot_error(path, e))?;

    for (significant, color) in [(false, NOT_SIGNIFICANT), (true, UP)] {
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == significant)
                    .map(|p| Circle::new((p.0, p.1), 2, color.filled())),
            )
            .map_err(|e| plot_error(path, e))?;
    }
    chart
        .draw_series(LineSeries::new(vec![(x_range.start, 0.0), (x_range.end, 0.0)], BLACK.stroke_width(1)))
        .map_err(|e| plot_error(path, e))?;
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(())
}
