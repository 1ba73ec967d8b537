//! salmon `quant.sf` tables

use std::path::Path;

use serde::Deserialize;

use crate::data::SampleSheet;
use crate::error::{PipelineError, Result};
use crate::tools::salmon::QUANT_FILE;

/// One row of `quant.sf`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuantRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Length")]
    pub length: f64,
    #[serde(rename = "EffectiveLength")]
    pub effective_length: f64,
    #[serde(rename = "TPM")]
    pub tpm: f64,
    #[serde(rename = "NumReads")]
    pub num_reads: f64,
}

/// Transcript-level quantification of one sample
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptQuant {
    pub sample: String,
    pub records: Vec<QuantRecord>,
}

impl TranscriptQuant {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse a tab-separated `quant.sf`; the sample is named after the
/// enclosing directory
pub fn read_quant_sf<P: AsRef<Path>>(path: P) -> Result<TranscriptQuant> {
    let path = path.as_ref();
    let invalid = |reason: String| PipelineError::InvalidQuant {
        path: path.display().to_string(),
        reason,
    };
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let records: Vec<QuantRecord> = reader.deserialize().collect::<std::result::Result<_, _>>()?;
    if records.is_empty() {
        return Err(invalid("no transcripts".to_string()));
    }
    if let Some(bad) = records.iter().find(|r| {
        [r.length, r.effective_length, r.tpm, r.num_reads]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
    }) {
        return Err(invalid(format!("negative or non-finite value for {}", bad.name)));
    }

    let sample = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    log::debug!("{}: {} transcripts", path.display(), records.len());
    Ok(TranscriptQuant { sample, records })
}

/// Load `dir/<sample>/quant.sf` for every sample in sheet order. All
/// samples must list the same transcripts in the same order.
pub fn load_samples<P: AsRef<Path>>(dir: P, sheet: &SampleSheet) -> Result<Vec<TranscriptQuant>> {
    let dir = dir.as_ref();
    sheet.validate_against_quant_dirs(dir)?;

    let mut quants: Vec<TranscriptQuant> = Vec::with_capacity(sheet.len());
    for sample in sheet.samples() {
        let path = dir.join(&sample.id).join(QUANT_FILE);
        let mut quant = read_quant_sf(&path)?;
        quant.sample = sample.id.clone();
        if let Some(first) = quants.first() {
            let same = first.len() == quant.len()
                && first.records.iter().zip(&quant.records).all(|(a, b)| a.name == b.name);
            if !same {
                return Err(PipelineError::InvalidQuant {
                    path: path.display().to_string(),
                    reason: format!("transcripts differ from sample {}", first.sample),
                });
            }
        }
        quants.push(quant);
    }
    log::info!("Loaded salmon quantifications for {} samples", quants.len());
    Ok(quants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use crate::test_support::write_quant;
    use tempfile::tempdir;

    fn sheet(ids: &[&str]) -> SampleSheet {
        SampleSheet::new(
            ids.iter()
                .map(|id| Sample {
                    id: id.to_string(),
                    group: "g".into(),
                    treatment: "t".into(),
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_read_quant_sf() {
        let dir = tempdir().unwrap();
        write_quant(dir.path(), "s1", &[("tx1", 900.0, 12.5, 40.0), ("tx2", 1500.0, 0.0, 0.0)]);
        let q = read_quant_sf(dir.path().join("s1").join(QUANT_FILE)).unwrap();
        assert_eq!(q.sample, "s1");
        assert_eq!(q.len(), 2);
        assert_eq!(q.records[0].length, 1000.0);
        assert_eq!(q.records[0].num_reads, 40.0);
    }

    #[test]
    fn test_rejects_negative_values() {
        let dir = tempdir().unwrap();
        write_quant(dir.path(), "s1", &[("tx1", 900.0, 1.0, -3.0)]);
        let err = read_quant_sf(dir.path().join("s1").join(QUANT_FILE)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuant { .. }));
    }

    #[test]
    fn test_load_samples_checks_transcripts() {
        let dir = tempdir().unwrap();
        write_quant(dir.path(), "s1", &[("tx1", 900.0, 1.0, 3.0)]);
        write_quant(dir.path(), "s2", &[("tx1", 900.0, 2.0, 6.0)]);
        let quants = load_samples(dir.path(), &sheet(&["s1", "s2"])).unwrap();
        assert_eq!(quants[1].sample, "s2");

        write_quant(dir.path(), "s2", &[("txX", 900.0, 2.0, 6.0)]);
        assert!(load_samples(dir.path(), &sheet(&["s1", "s2"])).is_err());
        assert!(matches!(
            load_samples(dir.path(), &sheet(&["s1"])),
            Err(PipelineError::SampleMismatch { .. })
        ));
    }
}
