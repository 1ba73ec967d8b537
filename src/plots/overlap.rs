//! Overlap of significant gene sets across comparisons (UpSet-style)

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use plotters::prelude::*;
use serde::Serialize;

use super::{plot_error, DOWN, NOT_SIGNIFICANT};
use crate::error::Result;

/// Genes found in exactly the sets flagged in `members`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intersection {
    pub members: Vec<bool>,
    pub count: usize,
}

/// Exclusive intersections of named gene sets, largest first. Patterns
/// with no genes are omitted.
pub fn intersections(sets: &[(String, BTreeSet<String>)]) -> Vec<Intersection> {
    let mut patterns: BTreeMap<Vec<bool>, usize> = BTreeMap::new();
    let union: BTreeSet<&String> = sets.iter().flat_map(|(_, genes)| genes.iter()).collect();
    for gene in union {
        let members: Vec<bool> = sets.iter().map(|(_, genes)| genes.contains(gene)).collect();
        *patterns.entry(members).or_default() += 1;
    }
    let mut out: Vec<Intersection> = patterns
        .into_iter()
        .map(|(members, count)| Intersection { members, count })
        .collect();
    out.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.members.iter().filter(|m| **m).count().cmp(&b.members.iter().filter(|m| **m).count()))
    });
    out
}

pub fn write_intersections<P: AsRef<Path>>(path: P, names: &[String], intersections: &[Intersection]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header = names.to_vec();
    header.push("count".to_string());
    writer.write_record(&header)?;
    for inter in intersections {
        let mut record: Vec<String> = inter.members.iter().map(|m| u8::from(*m).to_string()).collect();
        record.push(inter.count.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Bars of intersection sizes above a membership dot matrix
pub fn plot(sets: &[(String, BTreeSet<String>)], path: &Path) -> Result<Vec<Intersection>> {
    let inters = intersections(sets);
    let n_sets = sets.len() as i32;
    let n_bars = inters.len().max(1) as i32;

    let (left, top, col_w, bar_h, row_h) = (200_i32, 60_i32, 36_i32, 260_i32, 24_i32);
    let width = left + n_bars * col_w + 40;
    let height = top + bar_h + 20 + n_sets * row_h + 40;
    let max_count = inters.iter().map(|i| i.count).max().unwrap_or(1).max(1) as f64;

    let root = SVGBackend::new(path, (width as u32, height as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(path, e))?;
    root.draw(&Text::new(
        "Significant gene overlap",
        (20, 20),
        ("sans-serif", 20).into_font().color(&BLACK),
    ))
    .map_err(|e| plot_error(path, e))?;

    let dots_top = top + bar_h + 20;
    for (r, (name, genes)) in sets.iter().enumerate() {
        root.draw(&Text::new(
            format!("{} ({})", name, genes.len()),
            (10, dots_top + r as i32 * row_h + 4),
            ("sans-serif", 12).into_font().color(&BLACK),
        ))
        .map_err(|e| plot_error(path, e))?;
    }

    for (c, inter) in inters.iter().enumerate() {
        let x = left + c as i32 * col_w;
        let h = (inter.count as f64 / max_count * bar_h as f64).round() as i32;
        root.draw(&Rectangle::new(
            [(x + 6, top + bar_h - h), (x + col_w - 6, top + bar_h)],
            DOWN.filled(),
        ))
        .map_err(|e| plot_error(path, e))?;
        root.draw(&Text::new(
            inter.count.to_string(),
            (x + 8, top + bar_h - h - 14),
            ("sans-serif", 11).into_font().color(&BLACK),
        ))
        .map_err(|e| plot_error(path, e))?;

        let cx = x + col_w / 2;
        let rows: Vec<i32> = inter
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| **m)
            .map(|(r, _)| dots_top + r as i32 * row_h + row_h / 2)
            .collect();
        if let (Some(&first), Some(&last)) = (rows.first(), rows.last()) {
            root.draw(&PathElement::new(vec![(cx, first), (cx, last)], BLACK.stroke_width(2)))
                .map_err(|e| plot_error(path, e))?;
        }
        for (r, member) in inter.members.iter().enumerate() {
            let cy = dots_top + r as i32 * row_h + row_h / 2;
            let style = if *member { BLACK.filled() } else { NOT_SIGNIFICANT.mix(0.4).filled() };
            root.draw(&Circle::new((cx, cy), 6, style))
                .map_err(|e| plot_error(path, e))?;
        }
    }
    root.present().map_err(|e| plot_error(path, e))?;
    Ok(inters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(name: &str, genes: &[&str]) -> (String, BTreeSet<String>) {
        (name.to_string(), genes.iter().map(|g| g.to_string()).collect())
    }

    #[test]
    fn test_exclusive_intersections() {
        let sets = vec![
            set("shA", &["a", "b", "c", "d"]),
            set("shB", &["c", "d", "e"]),
            set("pooled", &["d", "f"]),
        ];
        let inters = intersections(&sets);
        let count = |m: [bool; 3]| inters.iter().find(|i| i.members == m).map_or(0, |i| i.count);
        assert_eq!(count([true, false, false]), 2);
        assert_eq!(count([true, true, false]), 1);
        assert_eq!(count([true, true, true]), 1);
        assert_eq!(count([false, true, false]), 1);
        assert_eq!(count([false, false, true]), 1);
        assert_eq!(inters.iter().map(|i| i.count).sum::<usize>(), 6);
        assert_eq!(inters[0].count, 2);
    }

    #[test]
    fn test_plot_and_table() {
        let dir = tempdir().unwrap();
        let sets = vec![set("shA", &["a", "b"]), set("shB", &["b"])];
        let inters = plot(&sets, &dir.path().join("overlap.svg")).unwrap();
        assert_eq!(inters.len(), 2);
        let table = dir.path().join("overlap.tsv");
        write_intersections(&table, &["shA".into(), "shB".into()], &inters).unwrap();
        let text = std::fs::read_to_string(&table).unwrap();
        assert!(text.starts_with("shA\tshB\tcount"));
        assert!(text.contains("1\t1\t1"));
    }

    #[test]
    fn test_empty_sets() {
        let dir = tempdir().unwrap();
        let sets = vec![set("shA", &[]), set("shB", &[])];
        assert!(plot(&sets, &dir.path().join("overlap.svg")).unwrap().is_empty());
    }
}
