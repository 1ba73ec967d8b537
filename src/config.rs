//! TOML run configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispersion::TrendFitMethod;
use crate::error::{PipelineError, Result};
use crate::shrinkage::ShrinkageMethod;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub project: Project,
    #[serde(default)]
    pub samples: Samples,
    #[serde(default)]
    pub acquisition: Acquisition,
    #[serde(default)]
    pub qc: Qc,
    #[serde(default)]
    pub trimming: Trimming,
    #[serde(default, alias = "quant")]
    pub quantification: Quantification,
    #[serde(default)]
    pub filtering: Filtering,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub significance: Significance,
    #[serde(default)]
    pub annotation: Annotation,
    #[serde(default)]
    pub enrichment: Enrichment,
    #[serde(default)]
    pub plots: Plots,
    #[serde(default)]
    pub comparisons: Comparisons,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Project {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Worker threads for rayon and the external tools
    #[serde(default = "default_threads")]
    pub threads: usize,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Samples {
    #[serde(default = "default_sheet")]
    pub sheet: PathBuf,
    /// One `<sample>/quant.sf` directory per sample
    #[serde(default = "default_quant_dir")]
    pub quant_dir: PathBuf,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_trimmed_dir")]
    pub trimmed_dir: PathBuf,
    /// Gene count table to start modeling from instead of `quant.sf` files
    #[serde(default)]
    pub count_matrix: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Acquisition {
    #[serde(default = "default_prefetch")]
    pub prefetch: String,
    #[serde(default = "default_fasterq_dump")]
    pub fasterq_dump: String,
    #[serde(default)]
    pub paired: bool,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Qc {
    #[serde(default = "default_fastqc")]
    pub fastqc: String,
    /// Run fastqc in addition to the built-in read statistics
    #[serde(default = "default_true")]
    pub run_fastqc: bool,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Trimming {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window")]
    pub window_size: usize,
    #[serde(default = "default_required_quality")]
    pub required_quality: u8,
    #[serde(default = "default_leading")]
    pub leading: u8,
    #[serde(default = "default_trailing")]
    pub trailing: u8,
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_phred_offset")]
    pub phred_offset: u8,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Quantification {
    #[serde(default = "default_salmon")]
    pub salmon: String,
    #[serde(default)]
    pub transcriptome: Option<PathBuf>,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_kmer")]
    pub kmer: usize,
    #[serde(default = "default_library_type")]
    pub library_type: String,
    /// Two-column transcript -> gene table
    #[serde(default)]
    pub tx2gene: Option<PathBuf>,
    /// Use average transcript lengths as gene-level offsets
    #[serde(default = "default_true")]
    pub length_offsets: bool,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Filtering {
    #[serde(default = "default_min_count")]
    pub min_count: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Model {
    #[serde(default)]
    pub fit_type: TrendFitMethod,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub shrinkage: ShrinkageMethod,
    /// Flag genes with extreme Cook's distances
    #[serde(default = "default_true")]
    pub cooks_filter: bool,
    /// Override the F(0.99, p, m - p) Cook's cutoff
    #[serde(default)]
    pub cooks_cutoff: Option<f64>,
    #[serde(default = "default_true")]
    pub independent_filtering: bool,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Significance {
    #[serde(default = "default_lfc_threshold")]
    pub lfc_threshold: f64,
    #[serde(default = "default_padj_threshold")]
    pub padj_threshold: f64,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Annotation {
    /// gene id -> symbol table
    #[serde(default)]
    pub symbols: Option<PathBuf>,
}

/// Which identifier the gene sets are keyed by
#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneIdKind {
    #[default]
    Symbol,
    Ensembl,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Enrichment {
    #[serde(default)]
    pub gene_sets: Option<PathBuf>,
    #[serde(default = "default_min_set_size")]
    pub min_set_size: usize,
    #[serde(default = "default_max_set_size")]
    pub max_set_size: usize,
    #[serde(default = "default_padj_threshold")]
    pub pvalue_cutoff: f64,
    #[serde(default = "default_permutations")]
    pub permutations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub id_kind: GeneIdKind,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Plots {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Highest-variance genes fed to PCA
    #[serde(default = "default_pca_genes")]
    pub pca_top_genes: usize,
    #[serde(default = "default_heatmap_genes")]
    pub heatmap_genes: usize,
    /// Genes labeled by symbol in volcano plots
    #[serde(default = "default_volcano_labels")]
    pub volcano_labels: usize,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Comparisons {
    /// `[numerator, denominator]` group pairs
    #[serde(default = "default_pairwise")]
    pub pairwise: Vec<[String; 2]>,
    /// `[numerator, denominator]` treatment levels; `[]` to skip
    #[serde(default = "default_pooled")]
    pub pooled: Vec<String>,
    #[serde(default = "default_control")]
    pub control: String,
}

fn default_true() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}
fn default_threads() -> usize {
    4
}
fn default_sheet() -> PathBuf {
    PathBuf::from("samples.tsv")
}
fn default_quant_dir() -> PathBuf {
    PathBuf::from("quant")
}
fn default_raw_dir() -> PathBuf {
    PathBuf::from("fastq")
}
fn default_trimmed_dir() -> PathBuf {
    PathBuf::from("trimmed")
}
fn default_prefetch() -> String {
    "prefetch".to_string()
}
fn default_fasterq_dump() -> String {
    "fasterq-dump".to_string()
}
fn default_fastqc() -> String {
    "fastqc".to_string()
}
fn default_window() -> usize {
    4
}
fn default_required_quality() -> u8 {
    20
}
fn default_leading() -> u8 {
    3
}
fn default_trailing() -> u8 {
    3
}
fn default_min_length() -> usize {
    36
}
fn default_phred_offset() -> u8 {
    33
}
fn default_salmon() -> String {
    "salmon".to_string()
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("salmon_index")
}
fn default_kmer() -> usize {
    31
}
fn default_library_type() -> String {
    "A".to_string()
}
fn default_min_count() -> f64 {
    10.0
}
fn default_min_samples() -> usize {
    2
}
fn default_alpha() -> f64 {
    0.1
}
fn default_lfc_threshold() -> f64 {
    2.0
}
fn default_padj_threshold() -> f64 {
    0.05
}
fn default_min_set_size() -> usize {
    10
}
fn default_max_set_size() -> usize {
    500
}
fn default_permutations() -> usize {
    1000
}
fn default_seed() -> u64 {
    42
}
fn default_pca_genes() -> usize {
    500
}
fn default_heatmap_genes() -> usize {
    50
}
fn default_volcano_labels() -> usize {
    10
}
fn default_pairwise() -> Vec<[String; 2]> {
    vec![
        ["shA".to_string(), "control".to_string()],
        ["shB".to_string(), "control".to_string()],
        ["shB".to_string(), "shA".to_string()],
    ]
}
fn default_pooled() -> Vec<String> {
    vec!["knockdown".to_string(), "control".to_string()]
}
fn default_control() -> String {
    "control".to_string()
}

impl Default for Project {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            threads: default_threads(),
        }
    }
}

impl Default for Samples {
    fn default() -> Self {
        Self {
            sheet: default_sheet(),
            quant_dir: default_quant_dir(),
            raw_dir: default_raw_dir(),
            trimmed_dir: default_trimmed_dir(),
            count_matrix: None,
        }
    }
}

impl Default for Acquisition {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
            fasterq_dump: default_fasterq_dump(),
            paired: false,
        }
    }
}

impl Default for Qc {
    fn default() -> Self {
        Self {
            fastqc: default_fastqc(),
            run_fastqc: true,
        }
    }
}

impl Default for Trimming {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: default_window(),
            required_quality: default_required_quality(),
            leading: default_leading(),
            trailing: default_trailing(),
            min_length: default_min_length(),
            phred_offset: default_phred_offset(),
        }
    }
}

impl Default for Quantification {
    fn default() -> Self {
        Self {
            salmon: default_salmon(),
            transcriptome: None,
            index_dir: default_index_dir(),
            kmer: default_kmer(),
            library_type: default_library_type(),
            tx2gene: None,
            length_offsets: true,
        }
    }
}

impl Default for Filtering {
    fn default() -> Self {
        Self {
            min_count: default_min_count(),
            min_samples: default_min_samples(),
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self {
            fit_type: TrendFitMethod::default(),
            alpha: default_alpha(),
            shrinkage: ShrinkageMethod::default(),
            cooks_filter: true,
            cooks_cutoff: None,
            independent_filtering: true,
        }
    }
}

impl Default for Significance {
    fn default() -> Self {
        Self {
            lfc_threshold: default_lfc_threshold(),
            padj_threshold: default_padj_threshold(),
        }
    }
}

impl Default for Enrichment {
    fn default() -> Self {
        Self {
            gene_sets: None,
            min_set_size: default_min_set_size(),
            max_set_size: default_max_set_size(),
            pvalue_cutoff: default_padj_threshold(),
            permutations: default_permutations(),
            seed: default_seed(),
            id_kind: GeneIdKind::default(),
        }
    }
}

impl Default for Plots {
    fn default() -> Self {
        Self {
            enabled: true,
            pca_top_genes: default_pca_genes(),
            heatmap_genes: default_heatmap_genes(),
            volcano_labels: default_volcano_labels(),
        }
    }
}

impl Default for Comparisons {
    fn default() -> Self {
        Self {
            pairwise: default_pairwise(),
            pooled: default_pooled(),
            control: default_control(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Config = text.parse()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Default configuration as TOML text
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).map_err(|e| PipelineError::Config {
            reason: e.to_string(),
        })
    }

    pub fn check(&self) -> Result<()> {
        let fail = |reason: String| Err(PipelineError::Config { reason });

        if self.project.threads == 0 {
            return fail("project.threads must be at least 1".into());
        }
        let t = &self.trimming;
        if t.window_size == 0 {
            return fail("trimming.window_size must be at least 1".into());
        }
        if t.phred_offset != 33 && t.phred_offset != 64 {
            return fail(format!("trimming.phred_offset must be 33 or 64, got {}", t.phred_offset));
        }
        if self.quantification.kmer == 0 || self.quantification.kmer % 2 == 0 {
            return fail(format!("quantification.kmer must be odd, got {}", self.quantification.kmer));
        }
        if self.filtering.min_count < 0.0 || self.filtering.min_samples == 0 {
            return fail("filtering needs min_count >= 0 and min_samples >= 1".into());
        }
        for (name, v) in [
            ("model.alpha", self.model.alpha),
            ("significance.padj_threshold", self.significance.padj_threshold),
            ("enrichment.pvalue_cutoff", self.enrichment.pvalue_cutoff),
        ] {
            if !(v > 0.0 && v < 1.0) {
                return fail(format!("{} must be in (0, 1), got {}", name, v));
            }
        }
        if self.significance.lfc_threshold < 0.0 {
            return fail("significance.lfc_threshold must be non-negative".into());
        }
        if self.enrichment.min_set_size > self.enrichment.max_set_size {
            return fail("enrichment.min_set_size exceeds max_set_size".into());
        }
        let pooled = &self.comparisons.pooled;
        if !pooled.is_empty() && pooled.len() != 2 {
            return fail(format!("comparisons.pooled needs two levels or none, got {:?}", pooled));
        }
        let pairs = self
            .comparisons
            .pairwise
            .iter()
            .map(|[n, d]| (n, d))
            .chain(pooled.first().zip(pooled.get(1)));
        for (num, den) in pairs {
            if num.is_empty() || den.is_empty() || num == den {
                return fail(format!("comparison [{}, {}] needs two distinct levels", num, den));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c: Config = "".parse().unwrap();
        assert_eq!(c.trimming.window_size, 4);
        assert_eq!(c.trimming.required_quality, 20);
        assert_eq!(c.trimming.min_length, 36);
        assert_eq!(c.filtering.min_count, 10.0);
        assert_eq!(c.filtering.min_samples, 2);
        assert_eq!(c.significance.lfc_threshold, 2.0);
        assert_eq!(c.significance.padj_threshold, 0.05);
        assert_eq!(c.model.shrinkage, ShrinkageMethod::Apeglm);
        assert_eq!(c.comparisons.pairwise.len(), 3);
        assert_eq!(c, Config::default());
    }

    #[test]
    fn test_sections_override() {
        let c: Config = r#"
            [project]
            output_dir = "out"
            threads = 8

            [model]
            fit_type = "local"
            shrinkage = "normal"

            [comparisons]
            pairwise = [["kd1", "ctrl"]]
            control = "ctrl"
        "#
        .parse()
        .unwrap();
        assert_eq!(c.project.output_dir, PathBuf::from("out"));
        assert_eq!(c.model.fit_type, TrendFitMethod::Local);
        assert_eq!(c.model.shrinkage, ShrinkageMethod::Normal);
        assert_eq!(c.comparisons.pairwise, vec![["kd1".to_string(), "ctrl".to_string()]]);
        assert_eq!(c.trimming.window_size, 4);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!("[trimming]\nwindow = 4\n".parse::<Config>().is_err());
        assert!("[bogus]\n".parse::<Config>().is_err());
    }

    #[test]
    fn test_pooled_can_be_disabled() {
        let c: Config = "[comparisons]\npooled = []\n".parse().unwrap();
        assert!(c.comparisons.pooled.is_empty());
        assert!("[comparisons]\npooled = [\"a\"]\n".parse::<Config>().is_err());
    }

    #[test]
    fn test_check_rejects_bad_values() {
        assert!("[model]\nalpha = 1.5\n".parse::<Config>().is_err());
        assert!("[trimming]\nwindow_size = 0\n".parse::<Config>().is_err());
        assert!("[comparisons]\npairwise = [[\"a\", \"a\"]]\n".parse::<Config>().is_err());
    }

    #[test]
    fn test_default_toml_round_trips() {
        let text = Config::default_toml().unwrap();
        let c: Config = text.parse().unwrap();
        assert_eq!(c, Config::default());
    }
}
