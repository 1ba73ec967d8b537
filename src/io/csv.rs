//! Delimited tables: count matrices and gene x sample value matrices

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// Tab when the first non-empty line contains one, otherwise comma
pub fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        return Ok(if line.contains('\t') { b'\t' } else { b',' });
    }
    Ok(b'\t')
}

/// Format a value for a table cell; non-finite values become `NA`
pub fn format_value(x: f64) -> String {
    if x.is_finite() {
        format!("{}", x)
    } else {
        "NA".to_string()
    }
}

/// Read a count matrix: first column gene ids, header row sample ids
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(path)?)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(PipelineError::InvalidCountMatrix {
            reason: format!("{}: expected a gene id column and at least one sample", path.display()),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(|s| s.trim_matches('"').to_string()).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != n_samples + 1 {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!("row has {} columns, expected {}", record.len(), n_samples + 1),
            });
        }
        gene_ids.push(record[0].trim_matches('"').to_string());
        for field in record.iter().skip(1) {
            let v = field.trim_matches('"');
            values.push(v.parse::<f64>().map_err(|_| PipelineError::InvalidCountMatrix {
                reason: format!("invalid count value '{}' for gene '{}'", v, &record[0]),
            })?);
        }
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        PipelineError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!(
        "Read {} genes x {} samples from {}",
        gene_ids.len(),
        n_samples,
        path.display()
    );
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Write a gene x sample matrix as a tab-separated table
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    values: ArrayView2<'_, f64>,
    gene_ids: &[String],
    sample_ids: &[String],
) -> Result<()> {
    if values.dim() != (gene_ids.len(), sample_ids.len()) {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} x {}", gene_ids.len(), sample_ids.len()),
            got: format!("{} x {}", values.nrows(), values.ncols()),
        });
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(sample_ids.iter().cloned());
    writer.write_record(&header)?;
    for (gene, row) in gene_ids.iter().zip(values.rows()) {
        let mut record = vec![gene.clone()];
        record.extend(row.iter().map(|&v| format_value(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_count_matrix<P: AsRef<Path>>(path: P, counts: &CountMatrix) -> Result<()> {
    write_matrix(path, counts.counts(), counts.gene_ids(), counts.sample_ids())
}
