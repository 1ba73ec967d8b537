//! External programs: SRA toolkit, fastqc and salmon
//!
//! Each invocation is described by a [`ToolCommand`] so that command lines
//! can be logged, tested and skipped in dry-run mode.

pub mod fastqc;
pub mod salmon;
pub mod sra;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Config;
use crate::data::SampleSheet;
use crate::error::{PipelineError, Result};

/// Lines of stderr kept in a [`PipelineError::ToolFailed`] error
const STDERR_TAIL_LINES: usize = 20;

/// Program, arguments and working directory of one external call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    /// Run to completion, or only log the command line when `dry_run` is set
    pub fn run(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            log::info!("[dry-run] {}", self);
            return Ok(());
        }
        let program = find_program(&self.program)?;
        log::info!("Running {}", self);

        let mut command = Command::new(program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        let output = command.output()?;
        if !output.stdout.is_empty() {
            log::debug!("{} stdout:\n{}", self.program, String::from_utf8_lossy(&output.stdout).trim_end());
        }
        if !output.status.success() {
            return Err(PipelineError::ToolFailed {
                command: self.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Resolve `program` against `PATH` unless it already names a file
pub fn find_program(program: &str) -> Result<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return if direct.is_file() {
            Ok(direct.to_path_buf())
        } else {
            Err(PipelineError::ToolNotFound {
                program: program.to_string(),
            })
        };
    }
    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| PipelineError::ToolNotFound {
            program: program.to_string(),
        })
}

/// FASTQ files of one sample, one path for single-end and two for paired-end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReads {
    pub sample: String,
    pub reads: Vec<PathBuf>,
}

/// Download and convert every sample's reads in sheet order, skipping
/// samples whose FASTQ files are already present
pub fn acquire_all(sheet: &SampleSheet, config: &Config, dry_run: bool) -> Result<Vec<SampleReads>> {
    let acq = &config.acquisition;
    let raw_dir = &config.samples.raw_dir;
    if !dry_run {
        std::fs::create_dir_all(raw_dir)?;
    }

    let mut all = Vec::with_capacity(sheet.len());
    for sample in sheet.samples() {
        let reads = sra::fastq_paths(raw_dir, &sample.id, acq.paired);
        if reads.iter().all(|p| p.is_file()) {
            log::info!("{}: reads present, skipping download", sample.id);
        } else {
            sra::prefetch(&acq.prefetch, &sample.id, raw_dir).run(dry_run)?;
            sra::fasterq_dump(&acq.fasterq_dump, &sample.id, raw_dir, config.project.threads, acq.paired)
                .run(dry_run)?;
        }
        all.push(SampleReads {
            sample: sample.id.clone(),
            reads,
        });
    }
    Ok(all)
}

/// Build the salmon index when missing, then quantify each sample into
/// `quant_dir/<sample>`, skipping samples that already have a `quant.sf`
pub fn quantify_all(reads: &[SampleReads], config: &Config, dry_run: bool) -> Result<Vec<PathBuf>> {
    let q = &config.quantification;
    let threads = config.project.threads;

    if q.index_dir.join("versionInfo.json").is_file() {
        log::info!("Using salmon index at {}", q.index_dir.display());
    } else {
        let transcriptome = q.transcriptome.as_ref().ok_or_else(|| PipelineError::Config {
            reason: format!(
                "no salmon index at {} and quantification.transcriptome is not set",
                q.index_dir.display()
            ),
        })?;
        salmon::index(&q.salmon, transcriptome, &q.index_dir, q.kmer, threads).run(dry_run)?;
    }

    let mut outputs = Vec::with_capacity(reads.len());
    for sample in reads {
        let out_dir = config.samples.quant_dir.join(&sample.sample);
        if out_dir.join(salmon::QUANT_FILE).is_file() {
            log::info!("{}: quant.sf present, skipping salmon", sample.sample);
        } else {
            salmon::quant(&q.salmon, &q.index_dir, &sample.reads, &q.library_type, &out_dir, threads)?
                .run(dry_run)?;
        }
        outputs.push(out_dir);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use tempfile::tempdir;

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = ToolCommand::new("salmon").arg("quant").arg("-o").arg("my dir");
        assert_eq!(cmd.to_string(), "salmon quant -o 'my dir'");
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line{}\n", i)).collect();
        let tail = stderr_tail(text.as_bytes());
        assert!(tail.starts_with("line10"));
        assert!(tail.ends_with("line29"));
    }

    #[test]
    fn test_missing_program() {
        let err = find_program("definitely-not-a-real-tool-xyz").unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotFound { .. }));
        assert!(find_program("/no/such/dir/tool").is_err());
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        ToolCommand::new("definitely-not-a-real-tool-xyz").arg("x").run(true).unwrap();
        assert!(ToolCommand::new("definitely-not-a-real-tool-xyz").run(false).is_err());
    }

    #[test]
    fn test_acquire_skips_existing_reads() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.samples.raw_dir = dir.path().to_path_buf();
        config.acquisition.prefetch = "definitely-not-a-real-tool-xyz".into();
        std::fs::write(dir.path().join("SRR1.fastq"), "").unwrap();

        let sheet = SampleSheet::new(vec![Sample {
            id: "SRR1".into(),
            group: "control".into(),
            treatment: "control".into(),
        }])
        .unwrap();
        let reads = acquire_all(&sheet, &config, false).unwrap();
        assert_eq!(reads[0].reads, vec![dir.path().join("SRR1.fastq")]);
    }

    #[test]
    fn test_quantify_requires_index_or_transcriptome() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.quantification.index_dir = dir.path().join("idx");
        let reads = vec![SampleReads {
            sample: "s1".into(),
            reads: vec![dir.path().join("s1.fastq")],
        }];
        assert!(matches!(
            quantify_all(&reads, &config, true),
            Err(PipelineError::Config { .. })
        ));

        config.quantification.transcriptome = Some(dir.path().join("tx.fa"));
        config.samples.quant_dir = dir.path().join("quant");
        let outputs = quantify_all(&reads, &config, true).unwrap();
        assert_eq!(outputs, vec![dir.path().join("quant").join("s1")]);
    }
}
