//! Over-representation analysis with the hypergeometric test

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;

use super::gene_sets::GeneSets;
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone)]
pub struct OraParams {
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for OraParams {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 500,
        }
    }
}

/// One tested gene set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTerm {
    pub name: String,
    pub description: String,
    /// Query genes in the set (k)
    pub count: usize,
    /// Query genes annotated to any set (n)
    pub query_size: usize,
    /// Set members in the universe (M)
    pub set_size: usize,
    /// Universe genes annotated to any set (N)
    pub universe_size: usize,
    pub gene_ratio: f64,
    pub bg_ratio: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub genes: Vec<String>,
}

/// `P(X >= k)` for `X ~ Hypergeometric(N, M, n)`, summed in log space
pub fn hypergeometric_upper_tail(k: u64, population: u64, successes: u64, draws: u64) -> f64 {
    if k == 0 {
        return 1.0;
    }
    let upper = successes.min(draws);
    let lower = draws.saturating_sub(population - successes).max(k);
    if lower > upper {
        return 0.0;
    }
    let denom = ln_binomial(population, draws);
    let p: f64 = (lower..=upper)
        .map(|x| (ln_binomial(successes, x) + ln_binomial(population - successes, draws - x) - denom).exp())
        .sum();
    p.clamp(0.0, 1.0)
}

/// Test each set for over-representation of `genes` against `universe`.
///
/// Both are restricted to genes annotated to at least one set. Sets are
/// kept when their size within the universe lies in
/// `[min_size, max_size]` and they share at least one query gene; BH runs
/// across those. Terms come back sorted by p-value.
pub fn enrich(genes: &[String], universe: &[String], sets: &GeneSets, params: &OraParams) -> Vec<EnrichmentTerm> {
    let annotated = sets.all_genes();
    let universe: BTreeSet<&str> = universe
        .iter()
        .map(String::as_str)
        .filter(|g| annotated.contains(g))
        .collect();
    let query: BTreeSet<&str> = genes
        .iter()
        .map(String::as_str)
        .filter(|g| universe.contains(g))
        .collect();
    let (n_universe, n_query) = (universe.len(), query.len());
    if n_query == 0 {
        log::debug!("ORA: no query genes in the annotated universe");
        return Vec::new();
    }

    let mut terms: Vec<EnrichmentTerm> = sets
        .iter()
        .filter_map(|set| {
            let members: Vec<&str> = set
                .genes
                .iter()
                .map(String::as_str)
                .filter(|g| universe.contains(g))
                .collect();
            let m = members.len();
            if m < params.min_size || m > params.max_size {
                return None;
            }
            let overlap: Vec<String> = members
                .iter()
                .filter(|g| query.contains(*g))
                .map(|g| g.to_string())
                .collect();
            let k = overlap.len();
            if k == 0 {
                return None;
            }
            Some(EnrichmentTerm {
                name: set.name.clone(),
                description: set.description.clone(),
                count: k,
                query_size: n_query,
                set_size: m,
                universe_size: n_universe,
                gene_ratio: k as f64 / n_query as f64,
                bg_ratio: m as f64 / n_universe as f64,
                pvalue: hypergeometric_upper_tail(k as u64, n_universe as u64, m as u64, n_query as u64),
                padj: f64::NAN,
                genes: overlap,
            })
        })
        .collect();

    let padj = benjamini_hochberg(&terms.iter().map(|t| t.pvalue).collect::<Vec<_>>());
    for (term, p) in terms.iter_mut().zip(padj) {
        term.padj = p;
    }
    terms.sort_by(|a, b| a.pvalue.total_cmp(&b.pvalue).then_with(|| a.name.cmp(&b.name)));
    log::debug!("ORA: {} query genes, {} universe genes, {} sets tested", n_query, n_universe, terms.len());
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::GeneSet;

    fn names(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_hypergeometric_tail() {
        // N = 10, M = 4, n = 3: P(X >= 1) = 1 - C(6,3)/C(10,3) = 1 - 20/120
        assert!((hypergeometric_upper_tail(1, 10, 4, 3) - 100.0 / 120.0).abs() < 1e-10);
        // P(X >= 3) = C(4,3)/C(10,3)
        assert!((hypergeometric_upper_tail(3, 10, 4, 3) - 4.0 / 120.0).abs() < 1e-10);
        assert_eq!(hypergeometric_upper_tail(0, 10, 4, 3), 1.0);
        assert_eq!(hypergeometric_upper_tail(4, 10, 4, 3), 0.0);
    }

    #[test]
    fn test_pvalue_decreases_with_overlap() {
        let mut last = 1.0;
        for k in 1..=20 {
            let p = hypergeometric_upper_tail(k, 2000, 50, 100);
            assert!((0.0..=1.0).contains(&p));
            assert!(p <= last);
            last = p;
        }
        // P(X >= 20) = 1.97e-14
        assert!(last < 1e-13 && last > 1e-15);
    }

    #[test]
    fn test_enrich_ranks_enriched_set_first() {
        let universe = names("g", 0..200);
        let sets = GeneSets::new(vec![
            GeneSet {
                name: "ENRICHED".into(),
                description: String::new(),
                genes: names("g", 0..20),
            },
            GeneSet {
                name: "BACKGROUND".into(),
                description: String::new(),
                genes: names("g", 100..140),
            },
            GeneSet {
                name: "TINY".into(),
                description: String::new(),
                genes: names("g", 0..3),
            },
        ]);
        let mut query = names("g", 0..12);
        query.push("g120".into());
        query.push("not_in_universe".into());

        let terms = enrich(&query, &universe, &sets, &OraParams::default());
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].name, "ENRICHED");
        assert_eq!(terms[0].count, 12);
        assert_eq!(terms[0].query_size, 13);
        // only set members count toward the universe
        assert_eq!(terms[0].universe_size, 60);
        assert!((terms[0].bg_ratio - 20.0 / 60.0).abs() < 1e-12);
        assert!(terms[0].padj < 0.01);
        assert!(terms[1].pvalue > 0.5);
    }
}
