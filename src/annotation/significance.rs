//! Significance calls on fold change and adjusted p-value

use serde::{Deserialize, Serialize};

use crate::io::DeResults;

/// Compound threshold: `|log2FC| > lfc` and `padj < padj`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub lfc: f64,
    pub padj: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { lfc: 2.0, padj: 0.05 }
    }
}

impl Thresholds {
    pub fn is_significant(&self, lfc: f64, padj: f64) -> bool {
        padj.is_finite() && padj < self.padj && (lfc > self.lfc || lfc < -self.lfc)
    }
}

/// Set the `significant` column; returns the number of significant genes
pub fn flag(results: &mut DeResults, thresholds: &Thresholds) -> usize {
    for i in 0..results.n_genes() {
        results.significant[i] = thresholds.is_significant(results.log2_fold_changes[i], results.padj[i]);
    }
    let n = results.significant.iter().filter(|s| **s).count();
    log::info!(
        "{}: {} significant genes (|log2FC| > {}, padj < {})",
        results.name,
        n,
        thresholds.lfc,
        thresholds.padj
    );
    n
}

/// Significant genes split by direction, each sorted by adjusted p-value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegulatedGenes {
    pub up: Vec<usize>,
    pub down: Vec<usize>,
}

impl RegulatedGenes {
    /// Gene ids of `indices`
    pub fn ids(results: &DeResults, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| results.gene_ids[i].clone()).collect()
    }
}

pub fn split(results: &DeResults) -> RegulatedGenes {
    let mut genes = RegulatedGenes::default();
    for i in results.significant_indices() {
        if results.log2_fold_changes[i] > 0.0 {
            genes.up.push(i);
        } else {
            genes.down.push(i);
        }
    }
    let by_padj = |a: &usize, b: &usize| results.padj[*a].total_cmp(&results.padj[*b]);
    genes.up.sort_by(by_padj);
    genes.down.sort_by(by_padj);
    genes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> DeResults {
        let mut r = DeResults::new("x", "group", "b", "a", (0..6).map(|i| format!("g{}", i)).collect());
        r.log2_fold_changes = vec![3.0, -2.5, 2.0, 5.0, -4.0, 2.1];
        r.padj = vec![0.01, 0.001, 0.001, 0.2, f64::NAN, 0.0001];
        r
    }

    #[test]
    fn test_compound_threshold() {
        let mut r = results();
        let n = flag(&mut r, &Thresholds::default());
        assert_eq!(n, 3);
        // |lfc| == 2 is not enough, NaN padj is never significant
        assert_eq!(r.significant, vec![true, true, false, false, false, true]);
        for i in r.significant_indices() {
            assert!(r.log2_fold_changes[i].abs() > 2.0 && r.padj[i] < 0.05);
        }
    }

    #[test]
    fn test_split_sorted_by_padj() {
        let mut r = results();
        flag(&mut r, &Thresholds::default());
        let genes = split(&r);
        assert_eq!(genes.up, vec![5, 0]);
        assert_eq!(genes.down, vec![1]);
        assert_eq!(RegulatedGenes::ids(&r, &genes.down), vec!["g1".to_string()]);
    }
}
