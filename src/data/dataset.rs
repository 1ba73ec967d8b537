//! CountDataSet: counts, sample factors and the model products filled in
//! stage by stage

use ndarray::{Array1, Array2, Axis};

use super::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionEstimates;
use crate::error::{PipelineError, Result};
use crate::glm::{build_design, Design, GlmFit};

/// Counts plus everything estimated from them for one design
#[derive(Debug, Clone)]
pub struct CountDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
    design: Design,

    size_factors: Option<Array1<f64>>,
    /// Genes x samples; size factors broadcast over genes unless gene-level
    /// offsets were supplied
    normalization_factors: Option<Array2<f64>>,
    normalized_counts: Option<Array2<f64>>,

    dispersions: Option<DispersionEstimates>,
    fit: Option<GlmFit>,
}

impl CountDataSet {
    pub fn new(counts: CountMatrix, metadata: SampleMetadata, design: Design) -> Result<Self> {
        if counts.sample_ids() != metadata.sample_ids() {
            return Err(PipelineError::SampleMismatch {
                missing: metadata
                    .sample_ids()
                    .iter()
                    .filter(|s| !counts.sample_ids().contains(s))
                    .cloned()
                    .collect(),
                unexpected: counts
                    .sample_ids()
                    .iter()
                    .filter(|s| !metadata.sample_ids().contains(s))
                    .cloned()
                    .collect(),
            });
        }
        if design.matrix.nrows() != counts.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} design rows", counts.n_samples()),
                got: format!("{}", design.matrix.nrows()),
            });
        }
        if design.n_coefs() >= counts.n_samples() {
            log::warn!(
                "Design has {} coefficients for {} samples; no residual degrees of freedom",
                design.n_coefs(),
                counts.n_samples()
            );
        }

        Ok(Self {
            counts,
            metadata,
            design,
            size_factors: None,
            normalization_factors: None,
            normalized_counts: None,
            dispersions: None,
            fit: None,
        })
    }

    /// Build with the treatment-coded design `~factor`
    pub fn with_factor(
        counts: CountMatrix,
        metadata: SampleMetadata,
        factor: &str,
        reference: Option<&str>,
    ) -> Result<Self> {
        let design = build_design(&metadata, factor, reference)?;
        Self::new(counts, metadata, design)
    }

    /// Same data and normalization under another design; model products
    /// are dropped
    pub fn with_design(&self, design: Design) -> Result<Self> {
        let mut dds = Self::new(self.counts.clone(), self.metadata.clone(), design)?;
        dds.size_factors = self.size_factors.clone();
        dds.normalization_factors = self.normalization_factors.clone();
        dds.normalized_counts = self.normalized_counts.clone();
        Ok(dds)
    }

    /// Switch the reference level of the design factor.
    ///
    /// Fitted means, and therefore dispersions, do not depend on which level
    /// the intercept absorbs, so they are kept; the coefficient fit is not.
    pub fn relevel(&mut self, reference: &str) -> Result<()> {
        if self.design.info.reference_level == reference {
            return Ok(());
        }
        let factor = self.design.info.factor.clone();
        self.design = build_design(&self.metadata, &factor, Some(reference))?;
        self.fit = None;
        Ok(())
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.design.matrix
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalization_factors(&self) -> Option<&Array2<f64>> {
        self.normalization_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn dispersions(&self) -> Option<&DispersionEstimates> {
        self.dispersions.as_ref()
    }

    pub fn fit(&self) -> Option<&GlmFit> {
        self.fit.as_ref()
    }

    pub fn has_size_factors(&self) -> bool {
        self.normalization_factors.is_some()
    }

    /// Normalization factors, erroring when none were estimated
    pub fn require_normalization_factors(&self) -> Result<&Array2<f64>> {
        self.normalization_factors
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidInput {
                reason: "size factors must be estimated first".to_string(),
            })
    }

    pub fn require_dispersions(&self) -> Result<&DispersionEstimates> {
        self.dispersions.as_ref().ok_or_else(|| PipelineError::InvalidInput {
            reason: "dispersions must be estimated first".to_string(),
        })
    }

    pub fn require_fit(&self) -> Result<&GlmFit> {
        self.fit.as_ref().ok_or_else(|| PipelineError::InvalidInput {
            reason: "the GLM must be fitted first".to_string(),
        })
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(PipelineError::SizeFactorFailed {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        let nf = Array2::from_shape_fn((self.n_genes(), self.n_samples()), |(_, j)| size_factors[j]);
        self.size_factors = Some(size_factors);
        self.store_normalization_factors(nf);
        Ok(())
    }

    /// Gene-by-sample normalization factors (e.g. from transcript lengths)
    pub fn set_normalization_factors(&mut self, nf: Array2<f64>, size_factors: Array1<f64>) -> Result<()> {
        if nf.dim() != (self.n_genes(), self.n_samples()) {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} x {} normalization factors", self.n_genes(), self.n_samples()),
                got: format!("{} x {}", nf.nrows(), nf.ncols()),
            });
        }
        if nf.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(PipelineError::SizeFactorFailed {
                reason: "normalization factors must be positive finite values".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        self.store_normalization_factors(nf);
        Ok(())
    }

    fn store_normalization_factors(&mut self, nf: Array2<f64>) {
        let normalized = &self.counts.counts() / &nf;
        self.normalization_factors = Some(nf);
        self.normalized_counts = Some(normalized);
        self.dispersions = None;
        self.fit = None;
    }

    pub fn set_dispersions(&mut self, estimates: DispersionEstimates) -> Result<()> {
        if estimates.final_dispersions.len() != self.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} dispersions", self.n_genes()),
                got: format!("{}", estimates.final_dispersions.len()),
            });
        }
        self.dispersions = Some(estimates);
        self.fit = None;
        Ok(())
    }

    pub fn set_fit(&mut self, fit: GlmFit) -> Result<()> {
        if fit.coefficients.dim() != (self.n_genes(), self.design.n_coefs()) {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} x {} coefficients", self.n_genes(), self.design.n_coefs()),
                got: format!("{} x {}", fit.coefficients.nrows(), fit.coefficients.ncols()),
            });
        }
        self.fit = Some(fit);
        Ok(())
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Result<Array1<f64>> {
        let normalized = self.normalized_counts.as_ref().ok_or_else(|| PipelineError::InvalidInput {
            reason: "size factors must be estimated first".to_string(),
        })?;
        normalized
            .mean_axis(Axis(1))
            .ok_or_else(|| PipelineError::InvalidCountMatrix {
                reason: "no samples".to_string(),
            })
    }

    /// Genes with at least one non-zero count
    pub fn nonzero_genes(&self) -> Vec<bool> {
        self.counts
            .counts()
            .rows()
            .into_iter()
            .map(|r| r.iter().any(|&c| c > 0.0))
            .collect()
    }
}
