//! Gene-wise dispersion estimates
//!
//! Maximizes the Cox-Reid adjusted profile likelihood of each gene over
//! log dispersion. The same log posterior (with a log-normal prior added)
//! is reused by the MAP step.

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::data::CountDataSet;
use crate::error::Result;
use crate::glm::{default_ridge, fit_gene, GlmFitParams, MIN_MU};
use crate::linalg::{cholesky_solve, determinant, invert_symmetric, weighted_cross_product, weighted_cross_response};

/// Bounds on proposals of the line search (log scale)
const MIN_LOG_ALPHA_STEP: f64 = -30.0;
const MAX_LOG_ALPHA_STEP: f64 = 10.0;
const ARMIJO_EPSILON: f64 = 1e-4;
const GRID_POINTS: usize = 20;

/// Log-normal prior on the dispersion
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispersionPrior {
    pub log_mean: f64,
    pub variance: f64,
}

/// Result of the gene-wise step
#[derive(Debug, Clone)]
pub struct GeneWiseDispersions {
    /// NaN for genes with all-zero counts
    pub dispersions: Vec<f64>,
    /// Genes x samples fitted means the estimates were conditioned on
    pub mu: Array2<f64>,
    pub converged: Vec<bool>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DispersionFit {
    pub alpha: f64,
    pub converged: bool,
}

struct LineSearch {
    log_alpha: f64,
    initial_lp: f64,
    last_lp: f64,
    iterations: usize,
}

/// Cox-Reid adjusted log likelihood plus an optional log-normal prior
fn log_posterior(
    y: &[f64],
    mu: &[f64],
    design: &Array2<f64>,
    log_alpha: f64,
    prior: Option<&DispersionPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let inv_alpha = 1.0 / alpha;
    let ll: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            ln_gamma(yi + inv_alpha) - ln_gamma(inv_alpha) - yi * (mi + inv_alpha).ln()
                - inv_alpha * (1.0 + mi * alpha).ln()
        })
        .sum();

    let w: Vec<f64> = mu.iter().map(|&m| 1.0 / (1.0 / m + alpha)).collect();
    let p = design.ncols();
    let det = determinant(&weighted_cross_product(design, &w), p);
    let cox_reid = -0.5 * det.max(f64::MIN_POSITIVE).ln();

    let prior_term = prior
        .map(|pr| -0.5 * (log_alpha - pr.log_mean).powi(2) / pr.variance)
        .unwrap_or(0.0);
    ll + cox_reid + prior_term
}

/// Derivative of [`log_posterior`] with respect to log dispersion
fn d_log_posterior(
    y: &[f64],
    mu: &[f64],
    design: &Array2<f64>,
    log_alpha: f64,
    prior: Option<&DispersionPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let inv_alpha = 1.0 / alpha;
    let ll_part: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            digamma(inv_alpha) + (1.0 + mi * alpha).ln() - mi * alpha / (1.0 + mi * alpha)
                - digamma(yi + inv_alpha)
                + yi / (mi + inv_alpha)
        })
        .sum::<f64>()
        / (alpha * alpha);

    let p = design.ncols();
    let w: Vec<f64> = mu.iter().map(|&m| 1.0 / (1.0 / m + alpha)).collect();
    let dw: Vec<f64> = w.iter().map(|wi| -wi * wi).collect();
    let b_inv = invert_symmetric(&weighted_cross_product(design, &w), p);
    let db = weighted_cross_product(design, &dw);
    let trace: f64 = (0..p)
        .map(|i| (0..p).map(|k| b_inv[i * p + k] * db[k * p + i]).sum::<f64>())
        .sum();
    let cox_reid = -0.5 * trace;

    let prior_term = prior
        .map(|pr| -(log_alpha - pr.log_mean) / pr.variance)
        .unwrap_or(0.0);
    (ll_part + cox_reid) * alpha + prior_term
}

/// Armijo backtracking line search along the gradient in log dispersion
fn line_search(
    y: &[f64],
    mu: &[f64],
    design: &Array2<f64>,
    log_alpha: f64,
    prior: Option<&DispersionPrior>,
    params: &DispersionParams,
) -> LineSearch {
    let min_log_alpha = (params.min_disp / 10.0).ln();
    let mut a = log_alpha;
    let mut lp = log_posterior(y, mu, design, a, prior);
    let mut dlp = d_log_posterior(y, mu, design, a, prior);
    let initial_lp = lp;
    let mut kappa = params.kappa_0;
    let mut iterations = 0;
    let mut accepted = 0;

    while iterations < params.maxit {
        iterations += 1;
        if !dlp.is_finite() || dlp == 0.0 {
            break;
        }
        let proposal = a + kappa * dlp;
        if proposal < MIN_LOG_ALPHA_STEP {
            kappa = (MIN_LOG_ALPHA_STEP - a) / dlp;
        } else if proposal > MAX_LOG_ALPHA_STEP {
            kappa = (MAX_LOG_ALPHA_STEP - a) / dlp;
        }

        let theta_kappa = -log_posterior(y, mu, design, a + kappa * dlp, prior);
        let theta_hat_kappa = -lp - kappa * ARMIJO_EPSILON * dlp * dlp;
        if theta_kappa <= theta_hat_kappa {
            accepted += 1;
            a += kappa * dlp;
            let lp_new = log_posterior(y, mu, design, a, prior);
            let change = lp_new - lp;
            lp = lp_new;
            if change < params.disp_tol || a < min_log_alpha {
                break;
            }
            dlp = d_log_posterior(y, mu, design, a, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha: a,
        initial_lp,
        last_lp: lp,
        iterations,
    }
}

/// Coarse then fine grid over `[ln min_disp, ln max_disp]`; returns alpha
fn grid_search(
    y: &[f64],
    mu: &[f64],
    design: &Array2<f64>,
    min_disp: f64,
    max_disp: f64,
    prior: Option<&DispersionPrior>,
) -> f64 {
    let best_on = |grid: &[f64]| -> f64 {
        grid.iter()
            .map(|&a| (a, log_posterior(y, mu, design, a, prior)))
            .filter(|(_, lp)| lp.is_finite())
            .max_by(|x, z| x.1.total_cmp(&z.1))
            .map(|(a, _)| a)
            .unwrap_or(grid[0])
    };
    let grid = |lo: f64, hi: f64| -> Vec<f64> {
        let step = (hi - lo) / (GRID_POINTS - 1) as f64;
        (0..GRID_POINTS).map(|i| lo + i as f64 * step).collect()
    };

    let (lo, hi) = (min_disp.ln(), max_disp.ln());
    let delta = (hi - lo) / (GRID_POINTS - 1) as f64;
    let coarse = best_on(&grid(lo, hi));
    best_on(&grid(coarse - delta, coarse + delta)).exp()
}

/// Maximize the (penalized) log posterior of one gene starting at `alpha_init`.
///
/// Without a prior, a search that fails to improve the objective keeps the
/// starting value. Searches that hit `maxit`, or without a prior stop after
/// one step, are refined by grid search.
pub(crate) fn maximize_log_posterior(
    y: &[f64],
    mu: &[f64],
    design: &Array2<f64>,
    alpha_init: f64,
    prior: Option<&DispersionPrior>,
    params: &DispersionParams,
    max_disp: f64,
) -> DispersionFit {
    let search = line_search(y, mu, design, alpha_init.ln(), prior, params);
    let mut alpha = search.log_alpha.exp().min(max_disp);

    let converged = match prior {
        None => {
            let no_increase = search.last_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
            if no_increase {
                alpha = alpha_init;
            }
            search.iterations < params.maxit && search.iterations != 1
        }
        Some(_) => search.iterations < params.maxit,
    };

    if !converged && alpha > params.min_disp * 10.0 {
        alpha = grid_search(y, mu, design, params.min_disp, max_disp, prior);
    }
    DispersionFit {
        alpha: alpha.clamp(params.min_disp, max_disp),
        converged,
    }
}

/// Least-squares fitted values of `y` on the design
fn linear_model_fit(y: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let p = design.ncols();
    let ones = vec![1.0; y.len()];
    let beta = cholesky_solve(
        &weighted_cross_product(design, &ones),
        &weighted_cross_response(design, &ones, y),
        p,
    );
    design
        .rows()
        .into_iter()
        .map(|row| row.iter().zip(&beta).map(|(x, b)| x * b).sum())
        .collect()
}

/// Method-of-moments style estimate from residuals of the linear model
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let (m, p) = design.dim();
    let fitted = linear_model_fit(normalized, design);
    let est: f64 = normalized
        .iter()
        .zip(&fitted)
        .map(|(&y, &f)| {
            let mu = f.max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum::<f64>()
        / (m - p) as f64;
    est.max(0.0)
}

fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let (mean, var) = crate::stats::mean_var(normalized);
    (var - xim * mean) / (mean * mean)
}

/// Gene-wise dispersion of every gene in the dataset.
///
/// Fitted means come from the linear model on normalized counts when the
/// design is a cell-means model, otherwise from an NB GLM fit at the
/// initial dispersion.
pub fn estimate_gene_dispersions(dds: &CountDataSet, params: &DispersionParams) -> Result<GeneWiseDispersions> {
    let nf = dds.require_normalization_factors()?;
    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (m, p) = design.dim();
    let max_disp = (m as f64).max(10.0);
    let cell_means = dds.design().is_cell_means();

    let xim = nf
        .mean_axis(Axis(0))
        .map(|col_means| col_means.iter().map(|v| 1.0 / v).sum::<f64>() / m as f64)
        .unwrap_or(1.0);
    let glm_params = GlmFitParams::default();
    let ridge = vec![default_ridge(); p];

    let per_gene: Vec<(f64, Vec<f64>, bool)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let y: Vec<f64> = counts.row(i).to_vec();
            if y.iter().all(|&c| c == 0.0) {
                return (f64::NAN, vec![0.0; m], true);
            }
            let f: Vec<f64> = nf.row(i).to_vec();
            let normalized: Vec<f64> = y.iter().zip(&f).map(|(c, s)| c / s).collect();

            let rough = rough_disp_estimate(&normalized, design);
            let moments = moments_disp_estimate(&normalized, xim);
            let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

            let mu: Vec<f64> = if cell_means {
                linear_model_fit(&normalized, design)
                    .iter()
                    .zip(&f)
                    .map(|(fit, s)| (fit * s).max(MIN_MU))
                    .collect()
            } else {
                fit_gene(&y, &f, design, alpha_init, &ridge, &glm_params).mu
            };

            let fit = maximize_log_posterior(&y, &mu, design, alpha_init, None, params, max_disp);
            (fit.alpha, mu, fit.converged)
        })
        .collect();

    let mut mu = Array2::zeros((dds.n_genes(), m));
    let mut dispersions = Vec::with_capacity(per_gene.len());
    let mut converged = Vec::with_capacity(per_gene.len());
    for (i, (alpha, gene_mu, conv)) in per_gene.into_iter().enumerate() {
        for (j, v) in gene_mu.into_iter().enumerate() {
            mu[[i, j]] = v;
        }
        dispersions.push(alpha);
        converged.push(conv);
    }
    let n_refit = converged.iter().filter(|c| !**c).count();
    if n_refit > 0 {
        log::debug!("{} gene-wise dispersion searches refined by grid search", n_refit);
    }

    Ok(GeneWiseDispersions {
        dispersions,
        mu,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::glm::intercept_only;
    use crate::normalization::estimate_size_factors;
    use ndarray::array;

    fn two_group() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let y = [10.0, 25.0, 14.0, 40.0, 60.0, 31.0];
        let mu = [16.0, 16.0, 16.0, 44.0, 44.0, 44.0];
        let design = two_group();
        let prior = DispersionPrior {
            log_mean: -2.0,
            variance: 0.5,
        };
        for p in [None, Some(&prior)] {
            let a = (0.2_f64).ln();
            let h = 1e-5;
            let numeric = (log_posterior(&y, &mu, &design, a + h, p)
                - log_posterior(&y, &mu, &design, a - h, p))
                / (2.0 * h);
            let analytic = d_log_posterior(&y, &mu, &design, a, p);
            assert!((numeric - analytic).abs() < 1e-4 * analytic.abs().max(1.0));
        }
    }

    #[test]
    fn test_line_search_agrees_with_grid() {
        let y = [10.0, 25.0, 14.0, 40.0, 60.0, 31.0];
        let mu = [16.0, 16.0, 16.0, 44.0, 44.0, 44.0];
        let design = two_group();
        let params = DispersionParams::default();
        let fit = maximize_log_posterior(&y, &mu, &design, 0.1, None, &params, 10.0);
        let grid = grid_search(&y, &mu, &design, params.min_disp, 10.0, None);
        // refined grid steps are ~0.115 on the log scale
        assert!((fit.alpha.ln() - grid.ln()).abs() < 0.12);

        let best = (-300..=300)
            .map(|i| grid.ln() + i as f64 * 1e-3)
            .max_by(|a, b| {
                log_posterior(&y, &mu, &design, *a, None).total_cmp(&log_posterior(&y, &mu, &design, *b, None))
            })
            .unwrap();
        assert!((fit.alpha.ln() - best).abs() < 0.01);
    }

    #[test]
    fn test_prior_pulls_toward_its_mean() {
        let y = [10.0, 25.0, 14.0, 40.0, 60.0, 31.0];
        let mu = [16.0, 16.0, 16.0, 44.0, 44.0, 44.0];
        let design = two_group();
        let params = DispersionParams::default();
        let free = maximize_log_posterior(&y, &mu, &design, 0.1, None, &params, 10.0);
        let prior = DispersionPrior {
            log_mean: (0.01_f64).ln(),
            variance: 0.25,
        };
        let map = maximize_log_posterior(&y, &mu, &design, 0.1, Some(&prior), &params, 10.0);
        assert!(map.alpha < free.alpha);
        assert!(map.alpha > 0.01);
    }

    #[test]
    fn test_linear_model_fit_gives_group_means() {
        let fitted = linear_model_fit(&[1.0, 2.0, 3.0, 10.0, 20.0, 30.0], &two_group());
        assert!((fitted[0] - 2.0).abs() < 1e-8);
        assert!((fitted[5] - 20.0).abs() < 1e-8);
    }

    #[test]
    fn test_noisy_gene_gets_larger_dispersion() {
        let counts = array![
            [100.0, 102.0, 98.0, 101.0, 99.0, 100.0],
            [20.0, 300.0, 80.0, 10.0, 250.0, 40.0],
            [500.0, 510.0, 490.0, 505.0, 495.0, 500.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [50.0, 55.0, 45.0, 52.0, 48.0, 50.0]
        ];
        let samples: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let genes: Vec<String> = (1..=5).map(|i| format!("g{}", i)).collect();
        let cm = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let meta = SampleMetadata::new(samples);
        let mut dds = CountDataSet::new(cm, meta, intercept_only(6)).unwrap();
        estimate_size_factors(&mut dds).unwrap();

        let est = estimate_gene_dispersions(&dds, &DispersionParams::default()).unwrap();
        assert!(est.dispersions[1] > 0.3);
        assert!(est.dispersions[0] < 0.01);
        assert!(est.dispersions[3].is_nan());
        assert!(est.dispersions[1] > est.dispersions[4]);
        assert_eq!(est.mu.dim(), (5, 6));
    }
}
