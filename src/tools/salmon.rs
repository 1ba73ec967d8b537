//! salmon index and quant commands

use std::path::{Path, PathBuf};

use super::ToolCommand;
use crate::error::{PipelineError, Result};

/// Per-transcript table salmon writes in its output directory
pub const QUANT_FILE: &str = "quant.sf";

pub fn index(program: &str, transcriptome: &Path, index_dir: &Path, kmer: usize, threads: usize) -> ToolCommand {
    ToolCommand::new(program)
        .arg("index")
        .arg("-t")
        .arg(transcriptome)
        .arg("-i")
        .arg(index_dir)
        .arg("-k")
        .arg(kmer.to_string())
        .arg("-p")
        .arg(threads.to_string())
}

/// Mapping-based quantification of single-end (one file) or paired-end
/// (two files) reads
pub fn quant(
    program: &str,
    index_dir: &Path,
    reads: &[PathBuf],
    library_type: &str,
    out_dir: &Path,
    threads: usize,
) -> Result<ToolCommand> {
    let cmd = ToolCommand::new(program)
        .arg("quant")
        .arg("-i")
        .arg(index_dir)
        .arg("-l")
        .arg(library_type);
    let cmd = match reads {
        [single] => cmd.arg("-r").arg(single),
        [r1, r2] => cmd.arg("-1").arg(r1).arg("-2").arg(r2),
        _ => {
            return Err(PipelineError::InvalidInput {
                reason: format!("salmon quant takes one or two read files, got {}", reads.len()),
            })
        }
    };
    Ok(cmd
        .arg("-p")
        .arg(threads.to_string())
        .arg("--validateMappings")
        .arg("-o")
        .arg(out_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_command() {
        let cmd = index("salmon", Path::new("tx.fa"), Path::new("idx"), 31, 8);
        assert_eq!(cmd.to_string(), "salmon index -t tx.fa -i idx -k 31 -p 8");
    }

    #[test]
    fn test_quant_single_and_paired() {
        let single = quant("salmon", Path::new("idx"), &[PathBuf::from("r.fq")], "A", Path::new("q/s1"), 4).unwrap();
        assert_eq!(
            single.to_string(),
            "salmon quant -i idx -l A -r r.fq -p 4 --validateMappings -o q/s1"
        );
        let paired = quant(
            "salmon",
            Path::new("idx"),
            &[PathBuf::from("r1.fq"), PathBuf::from("r2.fq")],
            "ISR",
            Path::new("q/s1"),
            4,
        )
        .unwrap();
        assert!(paired.to_string().contains("-1 r1.fq -2 r2.fq"));
        assert!(quant("salmon", Path::new("idx"), &[], "A", Path::new("o"), 1).is_err());
    }
}
