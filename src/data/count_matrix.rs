//! Gene-level count table (genes x samples)

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

/// Make identifiers unique by suffixing repeats with `.1`, `.2`, ...
fn make_unique(ids: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(ids.len());
    ids.into_iter()
        .map(|id| {
            let n = seen.entry(id.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                id
            } else {
                let renamed = format!("{}.{}", id, *n - 1);
                log::warn!("Duplicate gene id '{}' renamed to '{}'", id, renamed);
                renamed
            }
        })
        .collect()
}

/// Read counts per gene and sample
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix, validating shape and values
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} gene ids", n_genes),
                got: format!("{} gene ids", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample ids", n_samples),
                got: format!("{} sample ids", sample_ids.len()),
            });
        }
        if n_genes == 0 || n_samples == 0 {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "count matrix has no genes or no samples".to_string(),
            });
        }
        if counts.iter().any(|&x| !x.is_finite() || x < 0.0) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "counts must be non-negative finite values".to_string(),
            });
        }
        if counts.iter().all(|&x| x == 0.0) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "all samples have 0 counts for all genes".to_string(),
            });
        }
        if counts.iter().any(|&x| x.fract() != 0.0) {
            log::warn!("Count matrix contains non-integer values; the NB model expects integer counts");
        }

        Ok(Self {
            counts,
            gene_ids: make_unique(gene_ids),
            sample_ids,
        })
    }

    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Number of samples
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Column sums
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Mean count of each gene across samples
    pub fn row_means(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(0))
            .map(|row| row.sum() / row.len().max(1) as f64)
            .collect()
    }

    /// Keep genes with at least `min_count` reads in at least `min_samples` samples
    pub fn filter_low_counts(&self, min_count: f64, min_samples: usize) -> Result<Self> {
        let keep: Vec<usize> = (0..self.n_genes())
            .filter(|&i| {
                self.counts.row(i).iter().filter(|&&x| x >= min_count).count() >= min_samples
            })
            .collect();

        if keep.is_empty() {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!(
                    "no gene has >= {} counts in >= {} samples",
                    min_count, min_samples
                ),
            });
        }

        log::info!(
            "Low-count filter (>= {} in >= {} samples): kept {} of {} genes",
            min_count,
            min_samples,
            keep.len(),
            self.n_genes()
        );
        self.subset_genes(&keep)
    }

    /// Select genes by row index
    pub fn subset_genes(&self, indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(0), indices);
        let gene_ids = indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(counts, gene_ids, self.sample_ids.clone())
    }

    /// Select samples by column index
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(1), indices);
        let sample_ids = indices.iter().map(|&j| self.sample_ids[j].clone()).collect();
        Self::new(counts, self.gene_ids.clone(), sample_ids)
    }

    /// Reorder columns to follow `order`, erroring on unknown ids
    pub fn reorder_samples(&self, order: &[String]) -> Result<Self> {
        let indices = order
            .iter()
            .map(|id| {
                self.sample_ids
                    .iter()
                    .position(|s| s == id)
                    .ok_or_else(|| PipelineError::SampleMismatch {
                        missing: vec![id.clone()],
                        unexpected: vec![],
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.subset_samples(&indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_rejects_bad_input() {
        let err = CountMatrix::new(array![[1.0, -1.0]], ids("g", 1), ids("s", 2));
        assert!(matches!(err, Err(PipelineError::InvalidCountMatrix { .. })));

        let err = CountMatrix::new(array![[0.0, 0.0]], ids("g", 1), ids("s", 2));
        assert!(err.is_err());

        let err = CountMatrix::new(array![[1.0, 2.0]], ids("g", 2), ids("s", 2));
        assert!(matches!(err, Err(PipelineError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_duplicate_ids_are_renamed() {
        let m = CountMatrix::new(
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            vec!["A".into(), "A".into(), "B".into()],
            ids("s", 2),
        )
        .unwrap();
        assert_eq!(m.gene_ids(), &["A", "A.1", "B"]);
    }

    #[test]
    fn test_filter_low_counts_threshold() {
        let m = CountMatrix::new(
            array![
                [10.0, 10.0, 0.0, 0.0, 0.0, 0.0],
                [10.0, 9.0, 9.0, 9.0, 9.0, 9.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 50.0],
                [100.0, 120.0, 90.0, 80.0, 110.0, 95.0]
            ],
            ids("g", 4),
            ids("s", 6),
        )
        .unwrap();

        let filtered = m.filter_low_counts(10.0, 2).unwrap();
        assert_eq!(filtered.gene_ids(), &["g1", "g4"]);
        for row in filtered.counts().rows() {
            assert!(row.iter().filter(|&&c| c >= 10.0).count() >= 2);
        }

        let again = filtered.filter_low_counts(10.0, 2).unwrap();
        assert_eq!(again, filtered);
    }

    #[test]
    fn test_filter_everything_is_an_error() {
        let m = CountMatrix::new(array![[1.0, 2.0]], ids("g", 1), ids("s", 2)).unwrap();
        assert!(m.filter_low_counts(10.0, 2).is_err());
    }

    #[test]
    fn test_reorder_samples() {
        let m = CountMatrix::new(array![[1.0, 2.0, 3.0]], ids("g", 1), ids("s", 3)).unwrap();
        let r = m
            .reorder_samples(&["s3".to_string(), "s1".to_string(), "s2".to_string()])
            .unwrap();
        assert_eq!(r.counts().row(0).to_vec(), vec![3.0, 1.0, 2.0]);
        assert!(m.reorder_samples(&["s9".to_string()]).is_err());
    }

    #[test]
    fn test_row_means() {
        let m = CountMatrix::new(array![[1.0, 3.0], [0.0, 10.0]], ids("g", 2), ids("s", 2)).unwrap();
        assert_eq!(m.row_means(), vec![2.0, 5.0]);
        assert_eq!(m.library_sizes(), vec![1.0, 13.0]);
    }
}
