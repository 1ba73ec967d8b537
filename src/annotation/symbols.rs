//! Gene id to symbol lookup

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::io::{detect_delimiter, DeResults};

/// `ENSG00000141510.17` -> `ENSG00000141510`
pub fn strip_version(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, version)) if !stem.is_empty() && version.chars().all(|c| c.is_ascii_digit()) => stem,
        _ => id,
    }
}

/// Gene id (without version) -> symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolMap {
    symbols: HashMap<String, String>,
}

impl SymbolMap {
    /// Build from pairs; the first mapping of a multi-mapped id wins
    pub fn from_pairs<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: Into<String>,
    {
        let mut symbols = HashMap::new();
        for (id, symbol) in pairs {
            let symbol: String = symbol.into();
            if symbol.is_empty() {
                continue;
            }
            symbols
                .entry(strip_version(id.as_ref()).to_string())
                .or_insert(symbol);
        }
        Self { symbols }
    }

    /// Two-column delimited table, with or without a header
    /// (`gene_id`/`symbol`); extra columns are ignored
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
            if record.len() < 2 {
                return Err(PipelineError::InvalidInput {
                    reason: format!("{}:{}: expected gene id and symbol", path.display(), line + 1),
                });
            }
            let id = record[0].trim_matches('"');
            if line == 0 && matches!(id.to_ascii_lowercase().as_str(), "gene_id" | "gene" | "ensembl_gene_id" | "id") {
                continue;
            }
            pairs.push((id.to_string(), record[1].trim_matches('"').to_string()));
        }
        let map = Self::from_pairs(pairs);
        log::info!("Loaded {} gene symbols from {}", map.len(), path.display());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&str> {
        self.symbols.get(strip_version(gene_id)).map(String::as_str)
    }
}

/// Fill the symbol column; genes without a mapping get an empty symbol.
/// Returns the number of genes annotated.
pub fn annotate(results: &mut DeResults, map: &SymbolMap) -> usize {
    let mut found = 0;
    for (symbol, id) in results.symbols.iter_mut().zip(&results.gene_ids) {
        match map.get(id) {
            Some(s) => {
                *symbol = s.to_string();
                found += 1;
            }
            None => symbol.clear(),
        }
    }
    if found < results.n_genes() {
        log::debug!("{}: {} of {} genes have no symbol", results.name, results.n_genes() - found, results.n_genes());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("ENSG00000141510.17"), "ENSG00000141510");
        assert_eq!(strip_version("ENSG00000141510"), "ENSG00000141510");
        assert_eq!(strip_version("HLA-A.x"), "HLA-A.x");
    }

    #[test]
    fn test_first_mapping_wins() {
        let map = SymbolMap::from_pairs([("ENSG1.2", "TP53"), ("ENSG1.3", "OTHER"), ("ENSG2", "")]);
        assert_eq!(map.get("ENSG1"), Some("TP53"));
        assert_eq!(map.get("ENSG1.9"), Some("TP53"));
        assert_eq!(map.get("ENSG2"), None);
    }

    #[test]
    fn test_from_path_with_header() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tsymbol").unwrap();
        writeln!(file, "ENSG1.1\tTP53").unwrap();
        writeln!(file, "ENSG2\tMYC\textra").unwrap();
        let map = SymbolMap::from_path(file.path()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("ENSG2"), Some("MYC"));
    }

    #[test]
    fn test_annotate_missing_is_empty() {
        let mut res = DeResults::new("x", "group", "b", "a", vec!["ENSG1.4".into(), "ENSG9".into()]);
        let map = SymbolMap::from_pairs([("ENSG1", "TP53")]);
        assert_eq!(annotate(&mut res, &map), 1);
        assert_eq!(res.symbols, vec!["TP53".to_string(), String::new()]);
    }
}
