//! Per-sample categorical factors used to build designs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Sample factors: factor name -> one level per sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    factors: BTreeMap<String, Vec<String>>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Self {
        Self {
            sample_ids,
            factors: BTreeMap::new(),
        }
    }

    /// Add (or replace) a factor column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} values for factor '{}'", self.sample_ids.len(), name),
                got: format!("{} values", values.len()),
            });
        }
        self.factors.insert(name.to_string(), values);
        Ok(())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Levels of a factor, one per sample
    pub fn condition(&self, name: &str) -> Option<&[String]> {
        self.factors.get(name).map(|v| v.as_slice())
    }

    /// Sorted distinct levels of a factor
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let values = self.condition(name).ok_or_else(|| PipelineError::InvalidInput {
            reason: format!("factor '{}' not found in sample metadata", name),
        })?;
        let mut levels = values.to_vec();
        levels.sort();
        levels.dedup();
        Ok(levels)
    }

    /// Indices of samples carrying `level` for factor `name`
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.condition(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }
}
