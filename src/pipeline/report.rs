//! Output layout and the JSON run summary

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::io::ResultsSummary;
use crate::plots::overlap::Intersection;
use crate::plots::pca::PcaResult;

/// File names under the output directory
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output and figure directories
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(self.figures())?;
        Ok(())
    }

    pub fn counts_raw(&self) -> PathBuf {
        self.root.join("counts_raw.tsv")
    }

    pub fn counts_filtered(&self) -> PathBuf {
        self.root.join("counts_filtered.tsv")
    }

    pub fn normalized_counts(&self) -> PathBuf {
        self.root.join("normalized_counts.tsv")
    }

    pub fn vst(&self) -> PathBuf {
        self.root.join("vst.tsv")
    }

    pub fn de(&self, name: &str) -> PathBuf {
        self.root.join(format!("de_{}.tsv", name))
    }

    pub fn significant(&self, name: &str) -> PathBuf {
        self.root.join(format!("significant_{}.tsv", name))
    }

    /// `direction` is `up` or `down`
    pub fn ora(&self, name: &str, direction: &str) -> PathBuf {
        self.root.join(format!("ora_{}_{}.tsv", name, direction))
    }

    pub fn gsea(&self, name: &str) -> PathBuf {
        self.root.join(format!("gsea_{}.tsv", name))
    }

    pub fn overlap(&self) -> PathBuf {
        self.root.join("overlap.tsv")
    }

    pub fn qc_dir(&self) -> PathBuf {
        self.root.join("qc")
    }

    pub fn read_stats(&self) -> PathBuf {
        self.qc_dir().join("read_stats.json")
    }

    pub fn figures(&self) -> PathBuf {
        self.root.join("figures")
    }

    pub fn figure(&self, name: &str) -> PathBuf {
        self.figures().join(format!("{}.svg", name))
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("summary.json")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentSummary {
    pub ora_up: usize,
    pub ora_down: usize,
    pub gsea: usize,
}

/// Per-comparison entry of the run summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    #[serde(flatten)]
    pub results: ResultsSummary,
    pub factor: String,
    /// Fitted the other way round and negated
    pub reversed: bool,
    pub shrinkage: Option<String>,
    /// Terms with adjusted p-value below the cutoff
    pub enrichment: Option<EnrichmentSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub samples: Vec<String>,
    pub genes_quantified: usize,
    pub genes_after_filter: usize,
    pub comparisons: Vec<ComparisonReport>,
    pub pca: Option<PcaResult>,
    pub overlap: Vec<Intersection>,
}

impl RunSummary {
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let out = OutputLayout::new("results");
        assert_eq!(out.de("shA_vs_control"), PathBuf::from("results/de_shA_vs_control.tsv"));
        assert_eq!(out.ora("x", "up"), PathBuf::from("results/ora_x_up.tsv"));
        assert_eq!(out.figure("pca"), PathBuf::from("results/figures/pca.svg"));
        assert_eq!(out.read_stats(), PathBuf::from("results/qc/read_stats.json"));
    }

    #[test]
    fn test_summary_json() {
        let dir = tempdir().unwrap();
        let summary = RunSummary {
            samples: vec!["s1".into()],
            genes_quantified: 10,
            genes_after_filter: 8,
            ..RunSummary::default()
        };
        let path = dir.path().join("summary.json");
        summary.write(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["genes_after_filter"], 8);
        assert!(value["pca"].is_null());
    }
}
