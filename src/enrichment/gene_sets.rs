//! Gene set collections in GMT format

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    /// Unique members in file order
    pub genes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneSets {
    sets: Vec<GeneSet>,
}

impl GeneSets {
    pub fn new(sets: Vec<GeneSet>) -> Self {
        Self { sets }
    }

    /// Parse a GMT file: `name <TAB> description <TAB> gene...` per line.
    /// Duplicate members are dropped; blank lines and `#` comments skipped.
    pub fn from_gmt<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut sets = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let name = fields.next().unwrap_or("").trim();
            let description = fields.next().ok_or_else(|| PipelineError::InvalidGeneSets {
                reason: format!("{}:{}: expected name, description and genes", path.display(), n + 1),
            })?;
            if name.is_empty() {
                return Err(PipelineError::InvalidGeneSets {
                    reason: format!("{}:{}: empty set name", path.display(), n + 1),
                });
            }
            let mut seen = BTreeSet::new();
            let genes: Vec<String> = fields
                .map(str::trim)
                .filter(|g| !g.is_empty() && seen.insert(g.to_string()))
                .map(str::to_string)
                .collect();
            sets.push(GeneSet {
                name: name.to_string(),
                description: description.trim().to_string(),
                genes,
            });
        }
        if sets.is_empty() {
            return Err(PipelineError::InvalidGeneSets {
                reason: format!("{}: no gene sets", path.display()),
            });
        }
        log::info!("Read {} gene sets from {}", sets.len(), path.display());
        Ok(Self { sets })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.iter()
    }

    /// Genes belonging to at least one set
    pub fn all_genes(&self) -> BTreeSet<&str> {
        self.sets
            .iter()
            .flat_map(|s| s.genes.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_gmt() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "HALLMARK_P53\thttp://example.org\tTP53\tMDM2\tCDKN1A\tTP53").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "SMALL\tna\tMYC").unwrap();
        let sets = GeneSets::from_gmt(file.path()).unwrap();
        assert_eq!(sets.len(), 2);
        let first = sets.iter().next().unwrap();
        assert_eq!(first.genes, vec!["TP53", "MDM2", "CDKN1A"]);
        assert_eq!(sets.all_genes().len(), 4);
    }

    #[test]
    fn test_missing_description() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ONLY_NAME").unwrap();
        assert!(matches!(
            GeneSets::from_gmt(file.path()),
            Err(PipelineError::InvalidGeneSets { .. })
        ));
    }
}
