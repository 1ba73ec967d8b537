//! Transcript to gene summarization
//!
//! counts = sum of NumReads, abundance = sum of TPM and length = the
//! TPM-weighted mean effective length over a gene's transcripts.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis};

use super::{Tx2Gene, TranscriptQuant};
use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// Gene-level matrices (genes x samples)
#[derive(Debug, Clone, PartialEq)]
pub struct GeneAbundance {
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub counts: Array2<f64>,
    pub abundance: Array2<f64>,
    pub length: Array2<f64>,
}

impl GeneAbundance {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Estimated counts rounded to integers
    pub fn to_count_matrix(&self) -> Result<CountMatrix> {
        CountMatrix::new(
            self.counts.mapv(f64::round),
            self.gene_ids.clone(),
            self.sample_ids.clone(),
        )
    }

    /// Lengths divided by each gene's geometric mean across samples
    pub fn length_offsets(&self) -> Array2<f64> {
        let mut offsets = self.length.clone();
        for mut row in offsets.axis_iter_mut(Axis(0)) {
            let geo = (row.iter().map(|l| l.ln()).sum::<f64>() / row.len() as f64).exp();
            if geo.is_finite() && geo > 0.0 {
                row.mapv_inplace(|l| l / geo);
            }
        }
        offsets
    }

    /// Keep the rows of `gene_ids`, in that order
    pub fn select_genes(&self, gene_ids: &[String]) -> Result<Self> {
        let index: BTreeMap<&str, usize> = self.gene_ids.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();
        let rows = gene_ids
            .iter()
            .map(|g| {
                index.get(g.as_str()).copied().ok_or_else(|| PipelineError::InvalidInput {
                    reason: format!("gene {} not in the gene abundance table", g),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            gene_ids: gene_ids.to_vec(),
            sample_ids: self.sample_ids.clone(),
            counts: self.counts.select(Axis(0), &rows),
            abundance: self.abundance.select(Axis(0), &rows),
            length: self.length.select(Axis(0), &rows),
        })
    }
}

/// Aggregate per-sample transcript quantifications to genes. Transcripts
/// without a gene are dropped with a warning; genes come out sorted by id.
pub fn summarize_to_genes(quants: &[TranscriptQuant], tx2gene: &Tx2Gene) -> Result<GeneAbundance> {
    let first = quants.first().ok_or_else(|| PipelineError::InvalidInput {
        reason: "no quantifications to summarize".to_string(),
    })?;

    let mut gene_index: BTreeMap<&str, usize> = BTreeMap::new();
    let mut tx_gene: Vec<Option<&str>> = Vec::with_capacity(first.len());
    let mut unmapped = 0;
    for record in &first.records {
        let gene = tx2gene.gene(&record.name);
        match gene {
            Some(g) => {
                gene_index.entry(g).or_insert(0);
            }
            None => unmapped += 1,
        }
        tx_gene.push(gene);
    }
    if gene_index.is_empty() {
        return Err(PipelineError::InvalidInput {
            reason: "no transcript maps to a gene".to_string(),
        });
    }
    if unmapped > 0 {
        log::warn!("{} of {} transcripts have no gene and are dropped", unmapped, first.len());
    }
    for (i, idx) in gene_index.values_mut().enumerate() {
        *idx = i;
    }

    let (n_genes, n_samples) = (gene_index.len(), quants.len());
    let mut counts = Array2::zeros((n_genes, n_samples));
    let mut abundance = Array2::zeros((n_genes, n_samples));
    let mut weighted_length = Array2::<f64>::zeros((n_genes, n_samples));
    let mut plain_length = Array2::<f64>::zeros((n_genes, n_samples));
    let mut n_transcripts = vec![0usize; n_genes];

    for gene in &tx_gene {
        if let Some(g) = gene {
            n_transcripts[gene_index[g]] += 1;
        }
    }
    for (j, quant) in quants.iter().enumerate() {
        if quant.len() != tx_gene.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} transcripts", tx_gene.len()),
                got: format!("{} in sample {}", quant.len(), quant.sample),
            });
        }
        for (record, gene) in quant.records.iter().zip(&tx_gene) {
            let Some(g) = gene else { continue };
            let i = gene_index[g];
            counts[[i, j]] += record.num_reads;
            abundance[[i, j]] += record.tpm;
            weighted_length[[i, j]] += record.tpm * record.effective_length;
            plain_length[[i, j]] += record.effective_length;
        }
    }

    let mut length = Array2::zeros((n_genes, n_samples));
    for i in 0..n_genes {
        let expressed: Vec<f64> = (0..n_samples)
            .filter(|&j| abundance[[i, j]] > 0.0)
            .map(|j| weighted_length[[i, j]] / abundance[[i, j]])
            .collect();
        // samples where the gene has no abundance borrow the mean length
        // of the samples where it does
        let fallback = if expressed.is_empty() {
            plain_length.row(i).sum() / (n_samples * n_transcripts[i].max(1)) as f64
        } else {
            expressed.iter().sum::<f64>() / expressed.len() as f64
        };
        for j in 0..n_samples {
            length[[i, j]] = if abundance[[i, j]] > 0.0 {
                weighted_length[[i, j]] / abundance[[i, j]]
            } else {
                fallback
            };
        }
    }

    log::info!(
        "Summarized {} transcripts to {} genes across {} samples",
        tx_gene.len() - unmapped,
        n_genes,
        n_samples
    );
    Ok(GeneAbundance {
        gene_ids: gene_index.keys().map(|g| g.to_string()).collect(),
        sample_ids: quants.iter().map(|q| q.sample.clone()).collect(),
        counts,
        abundance,
        length,
    })
}
