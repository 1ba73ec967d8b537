//! Differential-expression result tables

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::csv::format_value;
use crate::error::{PipelineError, Result};

/// Per-gene results of one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeResults {
    /// Comparison label used in output file names
    pub name: String,
    pub factor: String,
    pub numerator: String,
    pub denominator: String,

    pub gene_ids: Vec<String>,
    /// Mean of normalized counts
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    /// Wald statistic of the MLE fit (kept after shrinkage)
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
    /// Final (MAP) dispersion per gene
    pub dispersions: Vec<f64>,
    /// Maximum Cook's distance over samples
    pub max_cooks: Vec<f64>,
    /// s-values from apeglm shrinkage
    pub svalues: Option<Vec<f64>>,
    /// Shrinkage method applied to the LFC columns, if any
    pub shrinkage: Option<String>,

    /// Gene symbol (empty when unmapped)
    pub symbols: Vec<String>,
    pub significant: Vec<bool>,
}

impl DeResults {
    pub fn new(name: &str, factor: &str, numerator: &str, denominator: &str, gene_ids: Vec<String>) -> Self {
        let n = gene_ids.len();
        Self {
            name: name.to_string(),
            factor: factor.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            max_cooks: vec![f64::NAN; n],
            svalues: None,
            shrinkage: None,
            symbols: vec![String::new(); n],
            significant: vec![false; n],
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// The same comparison read the other way round: numerator and
    /// denominator swapped, fold changes and statistics negated
    pub fn reversed(&self, name: &str) -> Self {
        let mut out = self.clone();
        out.name = name.to_string();
        std::mem::swap(&mut out.numerator, &mut out.denominator);
        out.log2_fold_changes.iter_mut().for_each(|x| *x = -*x);
        out.stat.iter_mut().for_each(|x| *x = -*x);
        out
    }

    /// Indices of genes flagged significant
    pub fn significant_indices(&self) -> Vec<usize> {
        self.significant
            .iter()
            .enumerate()
            .filter(|(_, &s)| s)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        let tested = self.pvalues.iter().filter(|p| p.is_finite()).count();
        let below_alpha = self.padj.iter().filter(|p| p.is_finite() && **p < alpha).count();
        let significant = self.significant_indices();
        let up = significant
            .iter()
            .filter(|&&i| self.log2_fold_changes[i] > 0.0)
            .count();
        ResultsSummary {
            name: self.name.clone(),
            total_genes: self.n_genes(),
            genes_tested: tested,
            padj_below_alpha: below_alpha,
            significant: significant.len(),
            upregulated: up,
            downregulated: significant.len() - up,
            alpha,
        }
    }

    fn check_lengths(&self) -> Result<()> {
        let n = self.n_genes();
        let columns = [
            self.base_means.len(),
            self.log2_fold_changes.len(),
            self.lfc_se.len(),
            self.stat.len(),
            self.pvalues.len(),
            self.padj.len(),
            self.dispersions.len(),
            self.max_cooks.len(),
            self.symbols.len(),
            self.significant.len(),
        ];
        if columns.iter().any(|&len| len != n)
            || self.svalues.as_ref().is_some_and(|s| s.len() != n)
        {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} values per result column", n),
                got: format!("{:?}", columns),
            });
        }
        Ok(())
    }
}

/// Counts reported per comparison in the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub name: String,
    pub total_genes: usize,
    pub genes_tested: usize,
    pub padj_below_alpha: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  genes: {} ({} tested)", self.total_genes, self.genes_tested)?;
        writeln!(f, "  padj < {}: {}", self.alpha, self.padj_below_alpha)?;
        writeln!(
            f,
            "  significant: {} ({} up, {} down)",
            self.significant, self.upregulated, self.downregulated
        )
    }
}

fn write_rows<P: AsRef<Path>>(path: P, results: &DeResults, rows: &[usize]) -> Result<()> {
    results.check_lengths()?;
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header = vec![
        "gene_id",
        "symbol",
        "baseMean",
        "log2FoldChange",
        "lfcSE",
        "stat",
        "pvalue",
        "padj",
        "dispersion",
        "maxCooks",
    ];
    if results.svalues.is_some() {
        header.push("svalue");
    }
    header.push("significant");
    writer.write_record(&header)?;

    for &i in rows {
        let mut record = vec![
            results.gene_ids[i].clone(),
            results.symbols[i].clone(),
            format_value(results.base_means[i]),
            format_value(results.log2_fold_changes[i]),
            format_value(results.lfc_se[i]),
            format_value(results.stat[i]),
            format_value(results.pvalues[i]),
            format_value(results.padj[i]),
            format_value(results.dispersions[i]),
            format_value(results.max_cooks[i]),
        ];
        if let Some(s) = &results.svalues {
            record.push(format_value(s[i]));
        }
        record.push(results.significant[i].to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every gene, in input order
pub fn write_results<P: AsRef<Path>>(path: P, results: &DeResults) -> Result<()> {
    let rows: Vec<usize> = (0..results.n_genes()).collect();
    write_rows(path, results, &rows)
}

/// Write significant genes sorted by adjusted p-value
pub fn write_significant<P: AsRef<Path>>(path: P, results: &DeResults) -> Result<()> {
    let mut rows = results.significant_indices();
    rows.sort_by(|&a, &b| results.padj[a].total_cmp(&results.padj[b]));
    write_rows(path, results, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn results() -> DeResults {
        let mut r = DeResults::new(
            "shA_vs_ctrl",
            "group",
            "shA",
            "ctrl",
            vec!["g1".into(), "g2".into(), "g3".into()],
        );
        r.base_means = vec![100.0, 50.0, 0.0];
        r.log2_fold_changes = vec![3.0, -0.5, 0.0];
        r.lfc_se = vec![0.3, 0.4, 0.0];
        r.stat = vec![10.0, -1.25, f64::NAN];
        r.pvalues = vec![1e-20, 0.2, f64::NAN];
        r.padj = vec![2e-20, 0.2, f64::NAN];
        r.dispersions = vec![0.01, 0.05, f64::NAN];
        r.max_cooks = vec![0.1, 0.2, f64::NAN];
        r.significant = vec![true, false, false];
        r
    }

    #[test]
    fn test_reversed_negates() {
        let r = results();
        let rev = r.reversed("ctrl_vs_shA");
        assert_eq!(rev.numerator, "ctrl");
        assert_eq!(rev.denominator, "shA");
        for i in 0..3 {
            assert_eq!(rev.log2_fold_changes[i], -r.log2_fold_changes[i]);
            assert_eq!(rev.pvalues[i].to_bits(), r.pvalues[i].to_bits());
        }
        let back = rev.reversed("shA_vs_ctrl");
        assert_eq!(back.name, r.name);
        assert_eq!((&back.numerator, &back.denominator), (&r.numerator, &r.denominator));
        assert_eq!(back.gene_ids, r.gene_ids);
        assert_eq!(back.significant, r.significant);
        for (a, b) in [
            (&back.base_means, &r.base_means),
            (&back.log2_fold_changes, &r.log2_fold_changes),
            (&back.lfc_se, &r.lfc_se),
            (&back.stat, &r.stat),
            (&back.pvalues, &r.pvalues),
            (&back.padj, &r.padj),
            (&back.dispersions, &r.dispersions),
            (&back.max_cooks, &r.max_cooks),
        ] {
            assert!(same_values(a, b), "{:?} != {:?}", a, b);
        }
    }

    /// Element-wise equality with NaN matching NaN
    fn same_values(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
    }

    #[test]
    fn test_summary_counts() {
        let s = results().summary(0.1);
        assert_eq!(s.genes_tested, 2);
        assert_eq!(s.padj_below_alpha, 1);
        assert_eq!((s.significant, s.upregulated, s.downregulated), (1, 1, 0));
    }

    #[test]
    fn test_write_tables() {
        let dir = tempdir().unwrap();
        let all = dir.path().join("de.tsv");
        let sig = dir.path().join("sig.tsv");
        write_results(&all, &results()).unwrap();
        write_significant(&sig, &results()).unwrap();

        let text = std::fs::read_to_string(&all).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().nth(3).unwrap().contains("NA"));
        let text = std::fs::read_to_string(&sig).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("g1\t"));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let mut r = results();
        r.padj.pop();
        assert!(write_results(dir.path().join("x.tsv"), &r).is_err());
    }
}
