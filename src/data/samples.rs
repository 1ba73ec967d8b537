//! Sample sheet: sample id, knockdown group and treatment label

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SampleMetadata;
use crate::error::{PipelineError, Result};
use crate::io::detect_delimiter;

/// Factor name for the knockdown variant / control label
pub const GROUP_FACTOR: &str = "group";
/// Factor name for the pooled knockdown-vs-control label
pub const TREATMENT_FACTOR: &str = "treatment";

/// One sequenced library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Run accession or local sample name
    pub id: String,
    /// Knockdown variant or control
    pub group: String,
    /// Binary label: knockdown or control
    pub treatment: String,
}

/// The ordered sample table for one study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSheet {
    samples: Vec<Sample>,
}

impl SampleSheet {
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(PipelineError::InvalidSampleSheet {
                reason: "no samples".to_string(),
            });
        }
        let mut seen = BTreeSet::new();
        for s in &samples {
            if s.id.is_empty() {
                return Err(PipelineError::InvalidSampleSheet {
                    reason: "empty sample id".to_string(),
                });
            }
            if !seen.insert(s.id.as_str()) {
                return Err(PipelineError::InvalidSampleSheet {
                    reason: format!("duplicate sample id '{}'", s.id),
                });
            }
        }
        Ok(Self { samples })
    }

    /// Read a tab- or comma-delimited sheet with `sample`, `group` and
    /// `treatment` columns (header names are case-insensitive)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = detect_delimiter(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_matches('"').to_ascii_lowercase())
            .collect();
        let column = |names: &[&str]| -> Result<usize> {
            headers
                .iter()
                .position(|h| names.contains(&h.as_str()))
                .ok_or_else(|| PipelineError::InvalidSampleSheet {
                    reason: format!("{}: missing column '{}'", path.display(), names[0]),
                })
        };
        let id_col = column(&["sample", "sample_id", "run", "id"])?;
        let group_col = column(&["group", "condition"])?;
        let treatment_col = column(&["treatment"])?;

        let mut samples = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").trim_matches('"').to_string();
            samples.push(Sample {
                id: field(id_col),
                group: field(group_col),
                treatment: field(treatment_col),
            });
        }
        log::info!("Read {} samples from {}", samples.len(), path.display());
        Self::new(samples)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }

    /// Group and treatment factors in sheet order
    pub fn metadata(&self) -> Result<SampleMetadata> {
        let mut metadata = SampleMetadata::new(self.ids());
        metadata.add_condition(
            GROUP_FACTOR,
            self.samples.iter().map(|s| s.group.clone()).collect(),
        )?;
        metadata.add_condition(
            TREATMENT_FACTOR,
            self.samples.iter().map(|s| s.treatment.clone()).collect(),
        )?;
        Ok(metadata)
    }

    /// Check that `dir` holds exactly one quantification directory per sample
    pub fn validate_against_quant_dirs<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let mut found = BTreeSet::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                found.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        self.check_ids(&found)
    }

    fn check_ids(&self, found: &BTreeSet<String>) -> Result<()> {
        let expected: BTreeSet<String> = self.ids().into_iter().collect();
        let missing: Vec<String> = expected.difference(found).cloned().collect();
        let unexpected: Vec<String> = found.difference(&expected).cloned().collect();
        if missing.is_empty() && unexpected.is_empty() && found.len() == self.len() {
            Ok(())
        } else {
            Err(PipelineError::SampleMismatch { missing, unexpected })
        }
    }
}
