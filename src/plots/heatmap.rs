//! Heatmap of row-centered values with complete-linkage row ordering

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use plotters::prelude::*;

use super::{plot_error, DOWN, UP};
use crate::error::{PipelineError, Result};

/// Color scale limit in standard deviations
const Z_LIMIT: f64 = 2.0;

/// Center and scale each row; constant rows become zeros
pub fn row_zscores(data: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = data.to_owned();
    let n = data.ncols() as f64;
    for mut row in out.rows_mut() {
        let mean = row.sum() / n;
        let sd = if n > 1.0 {
            (row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        row.mapv_inplace(|v| if sd > 0.0 { (v - mean) / sd } else { 0.0 });
    }
    out
}

/// Leaf order of an agglomerative complete-linkage clustering of the rows
/// (Euclidean distance)
pub fn complete_linkage_order(data: ArrayView2<'_, f64>) -> Vec<usize> {
    let n = data.nrows();
    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = data
                .row(i)
                .iter()
                .zip(data.row(j).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut clusters: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();
    for _ in 1..n {
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..n {
            if clusters[a].is_none() {
                continue;
            }
            for b in (a + 1)..n {
                if clusters[b].is_none() {
                    continue;
                }
                if best.map_or(true, |(_, _, d)| dist[a][b] < d) {
                    best = Some((a, b, dist[a][b]));
                }
            }
        }
        let Some((a, b, _)) = best else { break };
        let merged_b = clusters[b].take().unwrap_or_default();
        if let Some(cluster) = clusters[a].as_mut() {
            cluster.extend(merged_b);
        }
        for k in 0..n {
            let d = dist[a][k].max(dist[b][k]);
            dist[a][k] = d;
            dist[k][a] = d;
        }
    }
    clusters.into_iter().flatten().flatten().collect()
}

fn scale_color(z: f64) -> RGBColor {
    let t = (z / Z_LIMIT).clamp(-1.0, 1.0);
    let (end, t) = if t >= 0.0 { (UP, t) } else { (DOWN, -t) };
    let mix = |c: u8| (255.0 + (c as f64 - 255.0) * t).round() as u8;
    RGBColor(mix(end.0), mix(end.1), mix(end.2))
}

/// Row z-scores of `data`, rows ordered by clustering, blue-white-red
pub fn plot(data: ArrayView2<'_, f64>, row_labels: &[String], col_labels: &[String], path: &Path) -> Result<()> {
    let (n_rows, n_cols) = data.dim();
    if n_rows == 0 || n_cols == 0 || row_labels.len() != n_rows || col_labels.len() != n_cols {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} row and {} column labels", n_rows, n_cols),
            got: format!("{} and {}", row_labels.len(), col_labels.len()),
        });
    }
    let z = row_zscores(data);
    let order = complete_linkage_order(z.view());

    let (cell_w, cell_h) = (60_i32, 14_i32);
    let (left, top, label_w) = (20_i32, 60_i32, 160_i32);
    let width = left + n_cols as i32 * cell_w + label_w + 80;
    let height = top + n_rows as i32 * cell_h + 80;

    let root = SVGBackend::new(path, (width as u32, height as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    root.draw(&Text::new(
        "Top significant genes (row z-score)",
        (left, 20),
        ("sans-serif", 20).into_font().color(&BLACK),
    ))
    .map_err(|e| plot_error(path, e))?;

    for (r, &i) in order.iter().enumerate() {
        let y = top + r as i32 * cell_h;
        for j in 0..n_cols {
            let x = left + j as i32 * cell_w;
            root.draw(&Rectangle::new(
                [(x, y), (x + cell_w, y + cell_h)],
                scale_color(z[[i, j]]).filled(),
            ))
            .map_err(|e| plot_error(path, e))?;
        }
        root.draw(&Text::new(
            row_labels[i].clone(),
            (left + n_cols as i32 * cell_w + 6, y + 1),
            ("sans-serif", 11).into_font().color(&BLACK),
        ))
        .map_err(|e| plot_error(path, e))?;
    }
    let bottom = top + n_rows as i32 * cell_h + 8;
    for (j, label) in col_labels.iter().enumerate() {
        root.draw(&Text::new(
            label.clone(),
            (left + j as i32 * cell_w + 4, bottom),
            ("sans-serif", 11).into_font().color(&BLACK),
        ))
        .map_err(|e| plot_error(path, e))?;
    }

    // color key
    let key_x = left + n_cols as i32 * cell_w + label_w;
    for step in 0..=20 {
        let z = Z_LIMIT - step as f64 * Z_LIMIT / 10.0;
        let y = top + step * 8;
        root.draw(&Rectangle::new([(key_x, y), (key_x + 16, y + 8)], scale_color(z).filled()))
            .map_err(|e| plot_error(path, e))?;
    }
    for (label, y) in [("+2", top), ("0", top + 80), ("-2", top + 160)] {
        root.draw(&Text::new(label, (key_x + 20, y), ("sans-serif", 11).into_font().color(&BLACK)))
            .map_err(|e| plot_error(path, e))?;
    }
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_row_zscores() {
        let z = row_zscores(array![[1.0, 2.0, 3.0], [5.0, 5.0, 5.0]].view());
        assert!((z[[0, 0]] + 1.0).abs() < 1e-12);
        assert!((z[[0, 2]] - 1.0).abs() < 1e-12);
        assert_eq!(z.row(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clustering_groups_similar_rows() {
        let data = array![[0.0, 0.0], [10.0, 10.0], [0.1, 0.0], [10.0, 10.2], [0.0, 0.2]];
        let order = complete_linkage_order(data.view());
        assert_eq!(order.len(), 5);
        let pos = |i: usize| order.iter().position(|&o| o == i).unwrap();
        // the two high rows are adjacent, the three low rows contiguous
        assert_eq!((pos(1) as i32 - pos(3) as i32).abs(), 1);
        let mut low: Vec<usize> = [0, 2, 4].iter().map(|&i| pos(i)).collect();
        low.sort();
        assert_eq!(low[2] - low[0], 2);
    }

    #[test]
    fn test_color_scale() {
        assert_eq!(scale_color(0.0), RGBColor(255, 255, 255));
        assert_eq!(scale_color(5.0), UP);
        assert_eq!(scale_color(-2.0), DOWN);
    }

    #[test]
    fn test_plot_writes_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("heatmap.svg");
        let data = array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]];
        let rows = vec!["TP53".to_string(), "MYC".to_string()];
        let cols = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        plot(data.view(), &rows, &cols, &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("MYC"));
        assert!(plot(data.view(), &rows[..1], &cols, &path).is_err());
    }
}
