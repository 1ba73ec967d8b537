//! Gene set enrichment: over-representation and pre-ranked GSEA

mod gene_sets;
pub mod gsea;
pub mod ora;

use std::path::Path;

pub use gene_sets::{GeneSet, GeneSets};
pub use gsea::{gsea, GseaParams, GseaTerm};
pub use ora::{enrich, EnrichmentTerm, OraParams};

use crate::error::{PipelineError, Result};
use crate::io::{detect_delimiter, format_value};

pub fn write_ora<P: AsRef<Path>>(path: P, terms: &[EnrichmentTerm]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "term",
        "description",
        "GeneRatio",
        "BgRatio",
        "pvalue",
        "padj",
        "count",
        "genes",
    ])?;
    for t in terms {
        writer.write_record([
            t.name.clone(),
            t.description.clone(),
            format!("{}/{}", t.count, t.query_size),
            format!("{}/{}", t.set_size, t.universe_size),
            format_value(t.pvalue),
            format_value(t.padj),
            t.count.to_string(),
            t.genes.join("/"),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_gsea<P: AsRef<Path>>(path: P, terms: &[GseaTerm]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["term", "description", "setSize", "ES", "NES", "pvalue", "padj", "leading_edge"])?;
    for t in terms {
        writer.write_record([
            t.name.clone(),
            t.description.clone(),
            t.set_size.to_string(),
            format_value(t.es),
            format_value(t.nes),
            format_value(t.pvalue),
            format_value(t.padj),
            t.leading_edge.join("/"),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One gene per line (first column); blank lines and `#` comments skipped
pub fn read_gene_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split(['\t', ',']).next())
        .map(|g| g.trim().to_string())
        .collect())
}

/// Two-column `gene score` table; a header row with a non-numeric score
/// is skipped
pub fn read_ranked<P: AsRef<Path>>(path: P) -> Result<Vec<(String, f64)>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(path)?)
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut ranked = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let (Some(gene), Some(score)) = (record.get(0), record.get(1)) else {
            return Err(PipelineError::InvalidInput {
                reason: format!("{}:{}: expected gene and score", path.display(), line + 1),
            });
        };
        match score.parse::<f64>() {
            Ok(v) => ranked.push((gene.to_string(), v)),
            Err(_) if line == 0 => continue,
            Err(_) => {
                return Err(PipelineError::InvalidInput {
                    reason: format!("{}:{}: score '{}' is not a number", path.display(), line + 1, score),
                })
            }
        }
    }
    Ok(ranked)
}
