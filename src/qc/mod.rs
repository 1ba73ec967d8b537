//! Read quality control: FASTQ IO, quality trimming and read statistics

pub mod fastq;
pub mod stats;
pub mod trim;

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::tools::{fastqc, SampleReads};

pub use stats::ReadStats;
pub use trim::{trim_fastq, trim_paired, trim_read, TrimParams, TrimStats};

/// Run fastqc (when enabled) and collect [`ReadStats`] for every read file
pub fn run_qc(reads: &[SampleReads], config: &Config, out_dir: &Path, dry_run: bool) -> Result<Vec<ReadStats>> {
    let files: Vec<PathBuf> = reads.iter().flat_map(|s| s.reads.iter().cloned()).collect();
    if config.qc.run_fastqc {
        if !dry_run {
            std::fs::create_dir_all(out_dir)?;
        }
        fastqc::run(&config.qc.fastqc, &files, out_dir, config.project.threads).run(dry_run)?;
    }
    if dry_run {
        return Ok(Vec::new());
    }
    files
        .iter()
        .map(|f| ReadStats::from_fastq(f, config.trimming.phred_offset))
        .collect()
}

fn trimmed_paths(dir: &Path, sample: &str, n_files: usize) -> Vec<PathBuf> {
    if n_files == 2 {
        vec![
            dir.join(format!("{}_1.trimmed.fastq.gz", sample)),
            dir.join(format!("{}_2.trimmed.fastq.gz", sample)),
        ]
    } else {
        vec![dir.join(format!("{}.trimmed.fastq.gz", sample))]
    }
}

/// Trim every sample into the trimmed directory; returns the reads the
/// quantification stage should use. Disabled trimming passes reads through.
pub fn trim_all(reads: &[SampleReads], config: &Config, dry_run: bool) -> Result<Vec<SampleReads>> {
    if !config.trimming.enabled {
        log::info!("Trimming disabled, quantifying raw reads");
        return Ok(reads.to_vec());
    }
    let params = TrimParams::from(&config.trimming);
    let dir = &config.samples.trimmed_dir;

    let mut trimmed = Vec::with_capacity(reads.len());
    for sample in reads {
        let outputs = trimmed_paths(dir, &sample.sample, sample.reads.len());
        if outputs.iter().all(|p| p.is_file()) {
            log::info!("{}: trimmed reads present, skipping", sample.sample);
        } else if dry_run {
            log::info!("[dry-run] trim {} -> {}", sample.sample, dir.display());
        } else {
            match (sample.reads.as_slice(), outputs.as_slice()) {
                ([r1, r2], [o1, o2]) => {
                    trim_paired(r1, r2, o1, o2, &params)?;
                }
                ([r], [o]) => {
                    trim_fastq(r, o, &params)?;
                }
                _ => {
                    return Err(PipelineError::InvalidInput {
                        reason: format!("{}: expected one or two read files, got {}", sample.sample, sample.reads.len()),
                    })
                }
            }
        }
        trimmed.push(SampleReads {
            sample: sample.sample.clone(),
            reads: outputs,
        });
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_trim_all_and_qc() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("s1.fastq");
        let qual = "I".repeat(40);
        let seq = "ACGT".repeat(10);
        std::fs::write(&raw, format!("@r\n{seq}\n+\n{qual}\n")).unwrap();

        let mut config = Config::default();
        config.samples.trimmed_dir = dir.path().join("trimmed");
        config.qc.run_fastqc = false;
        let reads = vec![SampleReads {
            sample: "s1".into(),
            reads: vec![raw],
        }];

        let trimmed = trim_all(&reads, &config, false).unwrap();
        assert_eq!(trimmed[0].reads, vec![dir.path().join("trimmed").join("s1.trimmed.fastq.gz")]);
        assert!(trimmed[0].reads[0].is_file());

        let stats = run_qc(&trimmed, &config, &dir.path().join("qc"), false).unwrap();
        assert_eq!(stats[0].reads, 1);
        assert!((stats[0].gc_fraction - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_failed_trim_leaves_no_outputs() {
        let dir = tempdir().unwrap();
        let qual = "I".repeat(40);
        let seq = "ACGT".repeat(10);
        let read = |name: &str| format!("@{name}\n{seq}\n+\n{qual}\n");
        let r1 = dir.path().join("s1_1.fastq");
        let r2 = dir.path().join("s1_2.fastq");
        std::fs::write(&r1, [read("a"), read("b"), read("c")].concat()).unwrap();
        std::fs::write(&r2, read("a")).unwrap();

        let mut config = Config::default();
        config.samples.trimmed_dir = dir.path().join("trimmed");
        let reads = vec![SampleReads {
            sample: "s1".into(),
            reads: vec![r1, r2],
        }];
        let outputs = trimmed_paths(&config.samples.trimmed_dir, "s1", 2);

        assert!(trim_all(&reads, &config, false).is_err());
        assert!(outputs.iter().all(|p| !p.exists()));
        assert_eq!(std::fs::read_dir(&config.samples.trimmed_dir).unwrap().count(), 0);
        // the mismatch is reported again instead of reusing partial files
        assert!(trim_all(&reads, &config, false).is_err());
        assert!(outputs.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_disabled_trimming_passes_through() {
        let mut config = Config::default();
        config.trimming.enabled = false;
        let reads = vec![SampleReads {
            sample: "s1".into(),
            reads: vec![PathBuf::from("x.fastq")],
        }];
        assert_eq!(trim_all(&reads, &config, false).unwrap(), reads);
    }
}
