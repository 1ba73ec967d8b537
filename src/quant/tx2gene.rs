//! Transcript to gene mapping

use std::collections::HashMap;
use std::path::Path;

use crate::annotation::strip_version;
use crate::error::{PipelineError, Result};
use crate::io::detect_delimiter;

const HEADER_NAMES: [&str; 5] = ["transcript_id", "transcript", "txname", "tx_id", "tx"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tx2Gene {
    genes: HashMap<String, String>,
    /// Same map keyed by unversioned transcript ids
    unversioned: HashMap<String, String>,
}

impl Tx2Gene {
    pub fn from_pairs<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut map = Self::default();
        for (tx, gene) in pairs {
            let (tx, gene): (String, String) = (tx.into(), gene.into());
            map.unversioned
                .entry(strip_version(&tx).to_string())
                .or_insert_with(|| gene.clone());
            map.genes.entry(tx).or_insert(gene);
        }
        map
    }

    /// Two-column delimited file, optionally with a header row
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(detect_delimiter(path)?)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut pairs = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let (Some(tx), Some(gene)) = (record.get(0), record.get(1)) else {
                return Err(PipelineError::InvalidInput {
                    reason: format!("{}:{}: expected transcript and gene columns", path.display(), line + 1),
                });
            };
            if line == 0 && HEADER_NAMES.contains(&tx.to_ascii_lowercase().as_str()) {
                continue;
            }
            pairs.push((tx.to_string(), gene.to_string()));
        }
        let map = Self::from_pairs(pairs);
        if map.is_empty() {
            return Err(PipelineError::InvalidInput {
                reason: format!("{}: no transcript to gene mappings", path.display()),
            });
        }
        log::info!("Read {} transcript to gene mappings from {}", map.len(), path.display());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Gene of `transcript`, retried without its version suffix
    pub fn gene(&self, transcript: &str) -> Option<&str> {
        self.genes
            .get(transcript)
            .or_else(|| self.unversioned.get(strip_version(transcript)))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_version_fallback() {
        let map = Tx2Gene::from_pairs([("ENST01.2", "ENSG01"), ("ENST02", "ENSG02")]);
        assert_eq!(map.gene("ENST01.2"), Some("ENSG01"));
        assert_eq!(map.gene("ENST01.5"), Some("ENSG01"));
        assert_eq!(map.gene("ENST02.1"), Some("ENSG02"));
        assert_eq!(map.gene("ENST03"), None);
    }

    #[test]
    fn test_from_path_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tx2gene.tsv");
        std::fs::write(&path, "TXNAME\tGENEID\ntx1\tgA\ntx2\tgA\ntx3\tgB\n").unwrap();
        let map = Tx2Gene::from_path(&path).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.gene("tx2"), Some("gA"));
        assert_eq!(map.gene("TXNAME"), None);
    }
}
