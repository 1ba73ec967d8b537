//! FastQC reports

use std::path::{Path, PathBuf};

use super::ToolCommand;

pub fn run(program: &str, fastqs: &[PathBuf], out_dir: &Path, threads: usize) -> ToolCommand {
    ToolCommand::new(program)
        .arg("--outdir")
        .arg(out_dir)
        .arg("--threads")
        .arg(threads.to_string())
        .arg("--quiet")
        .args(fastqs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastqc_command() {
        let cmd = run("fastqc", &[PathBuf::from("a.fastq"), PathBuf::from("b.fastq")], Path::new("qc"), 2);
        assert_eq!(cmd.to_string(), "fastqc --outdir qc --threads 2 --quiet a.fastq b.fastq");
    }
}
