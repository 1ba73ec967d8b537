//! Quality trimming with Trimmomatic step semantics
//!
//! Steps run in the order `LEADING`, `TRAILING`, `SLIDINGWINDOW`, `MINLEN`,
//! each on what the previous one kept.

use std::ops::Range;
use std::path::Path;

use bio::io::fastq;
use serde::Serialize;

use super::fastq::{records, StagedFastq};
use crate::config::Trimming;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimParams {
    /// Drop 5' bases below this quality
    pub leading: u8,
    /// Drop 3' bases below this quality
    pub trailing: u8,
    pub window_size: usize,
    /// Minimum average quality of a sliding window
    pub required_quality: u8,
    pub min_length: usize,
    pub phred_offset: u8,
}

impl Default for TrimParams {
    fn default() -> Self {
        Self::from(&Trimming::default())
    }
}

impl From<&Trimming> for TrimParams {
    fn from(t: &Trimming) -> Self {
        Self {
            leading: t.leading,
            trailing: t.trailing,
            window_size: t.window_size,
            required_quality: t.required_quality,
            min_length: t.min_length,
            phred_offset: t.phred_offset,
        }
    }
}

/// Read counts before and after trimming; pairs count once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrimStats {
    pub reads_in: u64,
    pub reads_out: u64,
    pub bases_in: u64,
    pub bases_out: u64,
}

impl TrimStats {
    pub fn dropped(&self) -> u64 {
        self.reads_in - self.reads_out
    }

    fn record(&mut self, len_in: usize, kept: Option<usize>) {
        self.reads_in += 1;
        self.bases_in += len_in as u64;
        if let Some(len) = kept {
            self.reads_out += 1;
            self.bases_out += len as u64;
        }
    }
}

fn sliding_window_end(qual: &[u8], window: usize, required: u8) -> usize {
    let len = qual.len();
    if len == 0 {
        return 0;
    }
    let w = window.max(1).min(len);
    let required_total = required as u32 * w as u32;
    let mut total: u32 = qual[..w].iter().map(|&q| q as u32).sum();
    for start in 0..=len - w {
        if start > 0 {
            total = total - qual[start - 1] as u32 + qual[start + w - 1] as u32;
        }
        if total < required_total {
            // keep the leading bases of the failing window that still pass
            let extra = qual[start..start + w].iter().take_while(|&&q| q >= required).count();
            return start + extra;
        }
    }
    len
}

/// Range of `qual` (raw FASTQ quality bytes) kept after trimming, or `None`
/// when the read is dropped
pub fn trim_read(qual: &[u8], params: &TrimParams) -> Option<Range<usize>> {
    let scores: Vec<u8> = qual.iter().map(|q| q.saturating_sub(params.phred_offset)).collect();

    let start = scores.iter().position(|&q| q >= params.leading)?;
    let end = scores.iter().rposition(|&q| q >= params.trailing).map(|i| i + 1)?;
    if end <= start {
        return None;
    }
    let end = start + sliding_window_end(&scores[start..end], params.window_size, params.required_quality);

    let len = end - start;
    if len == 0 || len < params.min_length {
        return None;
    }
    Some(start..end)
}

fn trimmed_record(record: &fastq::Record, range: Range<usize>) -> fastq::Record {
    fastq::Record::with_attrs(
        record.id(),
        record.desc(),
        &record.seq()[range.clone()],
        &record.qual()[range],
    )
}

/// Trim one FASTQ file into `output`
pub fn trim_fastq(input: &Path, output: &Path, params: &TrimParams) -> Result<TrimStats> {
    let mut out = StagedFastq::create(output)?;
    let mut stats = TrimStats::default();
    for record in records(input)? {
        let record = record?;
        let kept = trim_read(record.qual(), params);
        stats.record(record.seq().len(), kept.as_ref().map(|r| r.len()));
        if let Some(range) = kept {
            out.write_record(&trimmed_record(&record, range))?;
        }
    }
    out.persist()?;
    log::info!(
        "{}: kept {} of {} reads ({} dropped)",
        input.display(),
        stats.reads_out,
        stats.reads_in,
        stats.dropped()
    );
    Ok(stats)
}

/// Trim mates together; a pair is written only when both mates survive
pub fn trim_paired(r1: &Path, r2: &Path, out1: &Path, out2: &Path, params: &TrimParams) -> Result<TrimStats> {
    let mut w1 = StagedFastq::create(out1)?;
    let mut w2 = StagedFastq::create(out2)?;
    let mut mates2 = records(r2)?;
    let mut stats = TrimStats::default();

    for rec1 in records(r1)? {
        let rec1 = rec1?;
        let rec2 = mates2.next().ok_or_else(|| PipelineError::InvalidInput {
            reason: format!("{} has fewer reads than {}", r2.display(), r1.display()),
        })??;
        let len_in = rec1.seq().len() + rec2.seq().len();
        match (trim_read(rec1.qual(), params), trim_read(rec2.qual(), params)) {
            (Some(a), Some(b)) => {
                stats.record(len_in, Some(a.len() + b.len()));
                w1.write_record(&trimmed_record(&rec1, a))?;
                w2.write_record(&trimmed_record(&rec2, b))?;
            }
            _ => stats.record(len_in, None),
        }
    }
    if mates2.next().is_some() {
        return Err(PipelineError::InvalidInput {
            reason: format!("{} has more reads than {}", r2.display(), r1.display()),
        });
    }
    w1.persist()?;
    w2.persist()?;
    log::info!(
        "{} / {}: kept {} of {} pairs",
        r1.display(),
        r2.display(),
        stats.reads_out,
        stats.reads_in
    );
    Ok(stats)
}
