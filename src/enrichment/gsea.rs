//! Pre-ranked gene set enrichment analysis
//!
//! Weighted (p = 1) Kolmogorov-Smirnov running sum over a ranked gene
//! list, with a null distribution from random gene sets of the same size.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::gene_sets::GeneSets;
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone)]
pub struct GseaParams {
    pub min_size: usize,
    pub max_size: usize,
    pub permutations: usize,
    pub seed: u64,
}

impl Default for GseaParams {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 500,
            permutations: 1000,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GseaTerm {
    pub name: String,
    pub description: String,
    /// Set members present in the ranked list
    pub set_size: usize,
    pub es: f64,
    pub nes: f64,
    pub pvalue: f64,
    pub padj: f64,
    /// Members at or before the running-sum peak (after it for negative ES)
    pub leading_edge: Vec<String>,
}

/// Enrichment score of hits at sorted positions `hits` in a list of
/// `scores` sorted in decreasing order. Also returns the leading-edge hit
/// range.
pub fn enrichment_score(scores: &[f64], hits: &[usize]) -> (f64, std::ops::Range<usize>) {
    let n = scores.len();
    let n_hits = hits.len();
    if n_hits == 0 || n_hits >= n {
        return (0.0, 0..0);
    }
    let total: f64 = hits.iter().map(|&h| scores[h].abs()).sum();
    let weight = |h: usize| if total > 0.0 { scores[h].abs() / total } else { 1.0 / n_hits as f64 };
    let miss_penalty = 1.0 / (n - n_hits) as f64;

    let (mut max, mut max_at) = (0.0_f64, 0);
    let (mut min, mut min_at) = (0.0_f64, n_hits);
    let mut hit_sum = 0.0;
    for (j, &h) in hits.iter().enumerate() {
        let misses = (h - j) as f64 * miss_penalty;
        let before = hit_sum - misses;
        if before < min {
            min = before;
            min_at = j;
        }
        hit_sum += weight(h);
        let after = hit_sum - misses;
        if after > max {
            max = after;
            max_at = j + 1;
        }
    }
    if max >= -min {
        (max, 0..max_at)
    } else {
        (min, min_at..n_hits)
    }
}

fn null_scores(scores: &[f64], set_size: usize, permutations: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..permutations)
        .map(|_| {
            let mut hits = rand::seq::index::sample(&mut rng, scores.len(), set_size).into_vec();
            hits.sort_unstable();
            enrichment_score(scores, &hits).0
        })
        .collect()
}

/// Run GSEA on `ranked` (gene, score) pairs; genes with non-finite scores
/// are dropped. Terms come back sorted by p-value.
pub fn gsea(ranked: &[(String, f64)], sets: &GeneSets, params: &GseaParams) -> Vec<GseaTerm> {
    let mut ranked: Vec<&(String, f64)> = ranked.iter().filter(|(_, s)| s.is_finite()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let scores: Vec<f64> = ranked.iter().map(|(_, s)| *s).collect();
    let position: HashMap<&str, usize> = ranked
        .iter()
        .enumerate()
        .map(|(i, (g, _))| (g.as_str(), i))
        .collect();

    let candidates: Vec<(usize, Vec<usize>)> = sets
        .iter()
        .enumerate()
        .filter_map(|(idx, set)| {
            let mut hits: Vec<usize> = set.genes.iter().filter_map(|g| position.get(g.as_str()).copied()).collect();
            hits.sort_unstable();
            hits.dedup();
            (hits.len() >= params.min_size && hits.len() <= params.max_size && hits.len() < scores.len())
                .then_some((idx, hits))
        })
        .collect();
    let all_sets: Vec<_> = sets.iter().collect();

    let mut terms: Vec<GseaTerm> = candidates
        .par_iter()
        .map(|(idx, hits)| {
            let set = all_sets[*idx];
            let (es, edge) = enrichment_score(&scores, hits);
            let null = null_scores(&scores, hits.len(), params.permutations, params.seed.wrapping_add(*idx as u64));

            let same_sign: Vec<f64> = null
                .into_iter()
                .filter(|v| if es >= 0.0 { *v >= 0.0 } else { *v < 0.0 })
                .collect();
            let (nes, pvalue) = if same_sign.is_empty() {
                (f64::NAN, 1.0)
            } else {
                let mean = same_sign.iter().map(|v| v.abs()).sum::<f64>() / same_sign.len() as f64;
                let extreme = same_sign.iter().filter(|v| v.abs() >= es.abs()).count();
                (
                    if mean > 0.0 { es / mean } else { f64::NAN },
                    (extreme + 1) as f64 / (same_sign.len() + 1) as f64,
                )
            };
            GseaTerm {
                name: set.name.clone(),
                description: set.description.clone(),
                set_size: hits.len(),
                es,
                nes,
                pvalue,
                padj: f64::NAN,
                leading_edge: hits[edge].iter().map(|&h| ranked[h].0.clone()).collect(),
            }
        })
        .collect();

    let padj = benjamini_hochberg(&terms.iter().map(|t| t.pvalue).collect::<Vec<_>>());
    for (term, p) in terms.iter_mut().zip(padj) {
        term.padj = p;
    }
    terms.sort_by(|a, b| a.pvalue.total_cmp(&b.pvalue).then_with(|| a.name.cmp(&b.name)));
    log::debug!("GSEA: {} ranked genes, {} sets tested", scores.len(), terms.len());
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::GeneSet;

    #[test]
    fn test_enrichment_score_extremes() {
        let scores = [4.0, 3.0, 2.0, 1.0];
        let (top, edge) = enrichment_score(&scores, &[0]);
        assert!((top - 1.0).abs() < 1e-12);
        assert_eq!(edge, 0..1);
        let (bottom, edge) = enrichment_score(&scores, &[3]);
        assert!((bottom + 1.0).abs() < 1e-12);
        assert_eq!(edge, 0..1);
    }

    #[test]
    fn test_enrichment_score_weighted() {
        // hits at 0 and 2 with weights 4/6 and 2/6; one miss costs 1/2
        let scores = [4.0, 3.0, 2.0, 1.0];
        let (es, edge) = enrichment_score(&scores, &[0, 2]);
        assert!((es - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(edge, 0..1);
    }

    fn ranked_list() -> Vec<(String, f64)> {
        (0..200).map(|i| (format!("g{}", i), 100.0 - i as f64)).collect()
    }

    fn sets() -> GeneSets {
        let members = |r: std::ops::Range<usize>| r.map(|i| format!("g{}", i)).collect();
        GeneSets::new(vec![
            GeneSet {
                name: "TOP".into(),
                description: String::new(),
                genes: members(0..15),
            },
            GeneSet {
                name: "BOTTOM".into(),
                description: String::new(),
                genes: members(185..200),
            },
            GeneSet {
                name: "SPREAD".into(),
                description: String::new(),
                genes: (0..15).map(|i| format!("g{}", i * 13)).collect(),
            },
        ])
    }

    #[test]
    fn test_gsea_directions() {
        let params = GseaParams {
            permutations: 200,
            ..Default::default()
        };
        let terms = gsea(&ranked_list(), &sets(), &params);
        assert_eq!(terms.len(), 3);
        let get = |name: &str| terms.iter().find(|t| t.name == name).unwrap();
        assert!(get("TOP").es > 0.9 && get("TOP").nes > 1.0);
        assert!(get("BOTTOM").es < -0.9 && get("BOTTOM").nes < -1.0);
        assert!(get("TOP").pvalue < 0.02);
        assert!(get("SPREAD").pvalue > get("TOP").pvalue);
        assert_eq!(get("TOP").leading_edge.len(), 15);
    }

    #[test]
    fn test_gsea_is_reproducible() {
        let params = GseaParams {
            permutations: 100,
            ..Default::default()
        };
        let a = gsea(&ranked_list(), &sets(), &params);
        let b = gsea(&ranked_list(), &sets(), &params);
        assert_eq!(a, b);
    }
}
