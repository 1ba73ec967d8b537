//! Independent filtering on the mean of normalized counts

use crate::io::DeResults;
use crate::stats::{lowess, quantile_type7};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Threshold chosen by [`independent_filtering`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThreshold {
    /// Quantile of base means below which genes are filtered
    pub theta: f64,
    pub cutoff: f64,
    pub rejections: usize,
}

/// Replace `padj` with BH adjustment over genes whose base mean passes the
/// filter threshold that maximizes rejections at `alpha`.
///
/// The rejection curve over 50 quantiles is smoothed by lowess; the first
/// quantile whose count exceeds the smoothed maximum minus the residual RMSE
/// is used. With at most 10 rejections anywhere, nothing is filtered.
/// Genes below the cutoff get a NaN `padj`.
pub fn independent_filtering(results: &mut DeResults, alpha: f64) -> Option<FilterThreshold> {
    let n = results.n_genes();
    if n == 0 {
        return None;
    }
    let mut sorted: Vec<f64> = results.base_means.iter().copied().filter(|m| m.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let lower = results.base_means.iter().filter(|m| **m == 0.0 || !m.is_finite()).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_type7(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let filtered: Vec<f64> = results
                .pvalues
                .iter()
                .zip(&results.base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&filtered)
        })
        .collect();
    let rejections: Vec<usize> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|p| p.is_finite() && **p < alpha).count())
        .collect();

    let best = pick_threshold(&thetas, &rejections);
    log::debug!(
        "Independent filtering: theta {:.3}, base mean cutoff {:.2}, {} rejections",
        thetas[best],
        cutoffs[best],
        rejections[best]
    );

    let threshold = FilterThreshold {
        theta: thetas[best],
        cutoff: cutoffs[best],
        rejections: rejections[best],
    };
    if let Some(padj) = adjusted.into_iter().nth(best) {
        results.padj = padj;
    }
    Some(threshold)
}

fn pick_threshold(thetas: &[f64], rejections: &[usize]) -> usize {
    let max_rej = rejections.iter().copied().max().unwrap_or(0);
    if max_rej <= 10 {
        return 0;
    }
    let y: Vec<f64> = rejections.iter().map(|&r| r as f64).collect();
    let fit = lowess(thetas, &y, 0.2, 3);

    let residuals: Vec<f64> = y
        .iter()
        .zip(&fit)
        .filter(|(r, _)| **r > 0.0)
        .map(|(r, f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };
    let max_fit = fit.iter().copied().fold(f64::MIN, f64::max);

    [max_fit - rmse, 0.9 * max_fit, 0.8 * max_fit]
        .iter()
        .find_map(|&thresh| y.iter().position(|&r| r > thresh))
        .unwrap_or(0)
}
