//! SRA toolkit commands

use std::path::{Path, PathBuf};

use super::ToolCommand;

/// `prefetch <accession> --output-directory <out_dir>`
pub fn prefetch(program: &str, accession: &str, out_dir: &Path) -> ToolCommand {
    ToolCommand::new(program)
        .arg(accession)
        .arg("--output-directory")
        .arg(out_dir)
}

/// Convert a prefetched run to FASTQ inside `out_dir`
pub fn fasterq_dump(program: &str, accession: &str, out_dir: &Path, threads: usize, paired: bool) -> ToolCommand {
    ToolCommand::new(program)
        .arg(accession)
        .arg("--outdir")
        .arg(out_dir)
        .arg("--threads")
        .arg(threads.to_string())
        .arg(if paired { "--split-3" } else { "--split-spot" })
        .current_dir(out_dir)
}

/// FASTQ files `fasterq-dump` writes for `accession`
pub fn fastq_paths(out_dir: &Path, accession: &str, paired: bool) -> Vec<PathBuf> {
    if paired {
        vec![
            out_dir.join(format!("{}_1.fastq", accession)),
            out_dir.join(format!("{}_2.fastq", accession)),
        ]
    } else {
        vec![out_dir.join(format!("{}.fastq", accession))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fasterq_dump_arguments() {
        let cmd = fasterq_dump("fasterq-dump", "SRR123", Path::new("raw"), 4, true);
        assert_eq!(
            cmd.arguments(),
            vec!["SRR123", "--outdir", "raw", "--threads", "4", "--split-3"]
        );
        let single = fasterq_dump("fasterq-dump", "SRR123", Path::new("raw"), 1, false);
        assert!(single.arguments().contains(&"--split-spot".to_string()));
    }

    #[test]
    fn test_fastq_paths() {
        let paired = fastq_paths(Path::new("raw"), "SRR1", true);
        assert_eq!(paired[1], PathBuf::from("raw/SRR1_2.fastq"));
        assert_eq!(fastq_paths(Path::new("raw"), "SRR1", false).len(), 1);
        assert_eq!(prefetch("prefetch", "SRR1", Path::new("raw")).to_string(), "prefetch SRR1 --output-directory raw");
    }
}
