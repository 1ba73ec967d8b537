//! Per-file read statistics for the QC summary

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::fastq::records;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStats {
    pub path: String,
    pub reads: u64,
    pub bases: u64,
    pub min_length: usize,
    pub max_length: usize,
    pub mean_length: f64,
    /// Mean Phred score over all bases
    pub mean_quality: f64,
    /// G + C over A, C, G and T
    pub gc_fraction: f64,
    /// Mean Phred score at each read position
    pub per_position_quality: Vec<f64>,
}

impl ReadStats {
    pub fn from_fastq<P: AsRef<Path>>(path: P, phred_offset: u8) -> Result<Self> {
        let path = path.as_ref();
        let mut reads = 0u64;
        let mut bases = 0u64;
        let mut quality_sum = 0u64;
        let mut gc = 0u64;
        let mut acgt = 0u64;
        let mut min_length = usize::MAX;
        let mut max_length = 0;
        let mut position_sums: Vec<u64> = Vec::new();
        let mut position_counts: Vec<u64> = Vec::new();

        for record in records(path)? {
            let record = record?;
            let len = record.seq().len();
            reads += 1;
            bases += len as u64;
            min_length = min_length.min(len);
            max_length = max_length.max(len);
            if position_sums.len() < len {
                position_sums.resize(len, 0);
                position_counts.resize(len, 0);
            }
            for (i, &q) in record.qual().iter().enumerate() {
                let score = q.saturating_sub(phred_offset) as u64;
                quality_sum += score;
                position_sums[i] += score;
                position_counts[i] += 1;
            }
            for &b in record.seq() {
                match b.to_ascii_uppercase() {
                    b'G' | b'C' => {
                        gc += 1;
                        acgt += 1;
                    }
                    b'A' | b'T' => acgt += 1,
                    _ => {}
                }
            }
        }

        let ratio = |num: u64, den: u64| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let stats = Self {
            path: path.display().to_string(),
            reads,
            bases,
            min_length: if reads > 0 { min_length } else { 0 },
            max_length,
            mean_length: ratio(bases, reads),
            mean_quality: ratio(quality_sum, bases),
            gc_fraction: ratio(gc, acgt),
            per_position_quality: position_sums
                .iter()
                .zip(&position_counts)
                .map(|(&s, &c)| ratio(s, c))
                .collect(),
        };
        log::debug!(
            "{}: {} reads, mean length {:.1}, mean quality {:.1}, GC {:.3}",
            stats.path,
            stats.reads,
            stats.mean_length,
            stats.mean_quality,
            stats.gc_fraction
        );
        Ok(stats)
    }
}

/// Write all statistics as one pretty-printed JSON array
pub fn write_json<P: AsRef<Path>>(path: P, stats: &[ReadStats]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), stats)?;
    Ok(())
}
