//! apeglm shrinkage: MAP estimation under a heavy-tailed prior
//!
//! The target coefficient gets a Cauchy prior whose scale is estimated from
//! the MLE fold changes; the other coefficients get a wide normal prior.
//! Posterior SDs come from a Laplace approximation at the MAP, and the
//! false sign rate from the approximate normal posterior.

use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::io::DeResults;
use crate::linalg::solve;

/// Parameters for apeglm shrinkage
#[derive(Debug, Clone)]
pub struct ApeglmParams {
    /// Multiplier on the estimated prior scale
    pub multiplier: f64,
    /// Cap on the Cauchy scale
    pub max_prior_scale: f64,
    /// Normal prior SD on coefficients that are not shrunk
    pub no_shrink_scale: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for ApeglmParams {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            max_prior_scale: 1.0,
            no_shrink_scale: 15.0,
            max_iter: 100,
            tol: 1e-8,
        }
    }
}

/// Priors on the coefficients of one gene
#[derive(Debug, Clone)]
struct Prior {
    target: usize,
    cauchy_scale_sq: f64,
    normal_var: f64,
}

/// Data of one gene, offsets on the log scale
struct GeneData<'a> {
    y: &'a [f64],
    offsets: &'a [f64],
    design: &'a [Vec<f64>],
    size: f64,
    prior: &'a Prior,
}

#[derive(Debug, Clone)]
struct GeneShrinkage {
    map: Vec<f64>,
    sd: Vec<f64>,
    fsr: f64,
    converged: bool,
}

/// Shrink the log fold changes of coefficient `coef` in place.
///
/// `results` must hold the MLE for that coefficient. LFC and SE are
/// replaced by the MAP and posterior SD; p-values are kept. s-values are
/// stored alongside.
pub fn shrink(dds: &CountDataSet, results: &mut DeResults, coef: usize, params: &ApeglmParams) -> Result<()> {
    let counts = dds.counts().counts();
    let nf = dds.require_normalization_factors()?;
    let dispersions = &dds.require_dispersions()?.final_dispersions;
    let fit = dds.require_fit()?;
    let design = dds.design_matrix();
    let (n_samples, n_coefs) = design.dim();
    if coef >= n_coefs {
        return Err(PipelineError::InvalidContrast {
            reason: format!("coefficient {} out of range for a design with {} columns", coef, n_coefs),
        });
    }

    let ln2 = std::f64::consts::LN_2;
    let mle: Vec<(f64, f64)> = results
        .log2_fold_changes
        .iter()
        .zip(&results.lfc_se)
        .zip(dds.nonzero_genes())
        .filter(|(_, nonzero)| *nonzero)
        .map(|((lfc, se), _)| (lfc * ln2, se * ln2))
        .collect();
    let prior_var = prior_variance(&mle);
    let scale = (params.multiplier * prior_var.sqrt()).min(params.max_prior_scale);
    log::debug!("apeglm prior variance {:.5}, Cauchy scale {:.5}", prior_var, scale);

    let prior = Prior {
        target: coef,
        cauchy_scale_sq: scale * scale,
        normal_var: params.no_shrink_scale * params.no_shrink_scale,
    };
    let design_rows: Vec<Vec<f64>> = (0..n_samples).map(|j| design.row(j).to_vec()).collect();

    let genes: Vec<Option<GeneShrinkage>> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let y: Vec<f64> = counts.row(i).to_vec();
            let alpha = dispersions[i];
            if y.iter().all(|&c| c == 0.0) || !alpha.is_finite() || alpha <= 0.0 {
                return None;
            }
            let offsets: Vec<f64> = nf.row(i).iter().map(|f| f.ln()).collect();
            let gene = GeneData {
                y: &y,
                offsets: &offsets,
                design: &design_rows,
                size: 1.0 / alpha,
                prior: &prior,
            };
            let start: Vec<f64> = fit
                .coefficients
                .row(i)
                .iter()
                .map(|b| if b.is_finite() { b.clamp(-15.0, 15.0) } else { 0.0 })
                .collect();
            Some(shrink_gene(&gene, start, params))
        })
        .collect();

    let not_converged = genes.iter().flatten().filter(|g| !g.converged).count();
    if not_converged > 0 {
        log::warn!("apeglm: {} genes did not converge", not_converged);
    }

    let fsr: Vec<f64> = genes.iter().map(|g| g.as_ref().map_or(f64::NAN, |g| g.fsr)).collect();
    for (i, gene) in genes.iter().enumerate() {
        if let Some(g) = gene {
            results.log2_fold_changes[i] = g.map[coef] / ln2;
            results.lfc_se[i] = g.sd[coef] / ln2;
        }
    }
    results.svalues = Some(svalue(&fsr));
    Ok(())
}

fn shrink_gene(gene: &GeneData, start: Vec<f64>, params: &ApeglmParams) -> GeneShrinkage {
    let (map, converged) = newton(gene, start, params);
    let p = map.len();
    let hessian = neg_log_posterior_hessian(&map, gene);
    let sd: Vec<f64> = match invert(&hessian, p) {
        Some(cov) => (0..p)
            .map(|k| {
                let v = cov[k * p + k];
                if v > 0.0 {
                    v.sqrt()
                } else {
                    f64::NAN
                }
            })
            .collect(),
        None => vec![f64::NAN; p],
    };
    let target = gene.prior.target;
    let fsr = match Normal::new(0.0, sd[target]) {
        Ok(posterior) if sd[target].is_finite() => posterior.cdf(-map[target].abs()),
        _ => f64::NAN,
    };
    GeneShrinkage {
        map,
        sd,
        fsr,
        converged,
    }
}

/// Damped Newton with backtracking; falls back to steepest descent when
/// the Hessian does not give a descent direction
fn newton(gene: &GeneData, mut beta: Vec<f64>, params: &ApeglmParams) -> (Vec<f64>, bool) {
    let p = beta.len();
    let mut f = neg_log_posterior(&beta, gene);
    for _ in 0..params.max_iter {
        let grad = neg_log_posterior_gradient(&beta, gene);
        let hessian = neg_log_posterior_hessian(&beta, gene);
        let neg_grad: Vec<f64> = grad.iter().map(|g| -g).collect();

        let mut direction = solve(&hessian, &neg_grad, p)
            .filter(|d| d.iter().all(|v| v.is_finite()))
            .unwrap_or_else(|| neg_grad.clone());
        let mut slope: f64 = grad.iter().zip(&direction).map(|(g, d)| g * d).sum();
        if slope >= 0.0 {
            direction = neg_grad;
            slope = grad.iter().zip(&direction).map(|(g, d)| g * d).sum();
        }
        if slope.abs() < params.tol {
            return (beta, true);
        }

        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..40 {
            let candidate: Vec<f64> = beta.iter().zip(&direction).map(|(b, d)| b + step * d).collect();
            let f_new = neg_log_posterior(&candidate, gene);
            if f_new.is_finite() && f_new <= f + 1e-4 * step * slope {
                accepted = Some((candidate, f_new));
                break;
            }
            step *= 0.5;
        }
        let Some((next, f_new)) = accepted else {
            return (beta, false);
        };
        let change = next.iter().zip(&beta).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        let decrease = f - f_new;
        beta = next;
        f = f_new;
        if change < params.tol || decrease < params.tol * (f.abs() + params.tol) {
            return (beta, true);
        }
    }
    (beta, false)
}

fn eta(x: &[f64], beta: &[f64], offset: f64) -> f64 {
    x.iter().zip(beta).map(|(a, b)| a * b).sum::<f64>() + offset
}

/// Negative log posterior up to a constant
fn neg_log_posterior(beta: &[f64], gene: &GeneData) -> f64 {
    let r = gene.size;
    let mut value = 0.0;
    for ((x, &y), &offset) in gene.design.iter().zip(gene.y).zip(gene.offsets) {
        let e = eta(x, beta, offset);
        value -= y * e - (y + r) * (e.exp() + r).ln();
    }
    for (k, b) in beta.iter().enumerate() {
        if k == gene.prior.target {
            value += (1.0 + b * b / gene.prior.cauchy_scale_sq).ln();
        } else {
            value += b * b / (2.0 * gene.prior.normal_var);
        }
    }
    value
}

fn neg_log_posterior_gradient(beta: &[f64], gene: &GeneData) -> Vec<f64> {
    let r = gene.size;
    let mut grad = vec![0.0; beta.len()];
    for ((x, &y), &offset) in gene.design.iter().zip(gene.y).zip(gene.offsets) {
        let mu = eta(x, beta, offset).exp();
        let c = y - (y + r) * mu / (mu + r);
        for (g, xk) in grad.iter_mut().zip(x) {
            *g -= xk * c;
        }
    }
    for (k, (g, b)) in grad.iter_mut().zip(beta).enumerate() {
        if k == gene.prior.target {
            *g += 2.0 * b / (gene.prior.cauchy_scale_sq + b * b);
        } else {
            *g += b / gene.prior.normal_var;
        }
    }
    grad
}

/// Flat row-major Hessian of [`neg_log_posterior`]
fn neg_log_posterior_hessian(beta: &[f64], gene: &GeneData) -> Vec<f64> {
    let p = beta.len();
    let r = gene.size;
    let mut h = vec![0.0; p * p];
    for ((x, &y), &offset) in gene.design.iter().zip(gene.y).zip(gene.offsets) {
        let mu = eta(x, beta, offset).exp();
        let w = (y + r) * r * mu / ((mu + r) * (mu + r));
        for a in 0..p {
            for b in 0..p {
                h[a * p + b] += w * x[a] * x[b];
            }
        }
    }
    for (k, b) in beta.iter().enumerate() {
        h[k * p + k] += if k == gene.prior.target {
            let s2 = gene.prior.cauchy_scale_sq;
            2.0 * (s2 - b * b) / ((s2 + b * b) * (s2 + b * b))
        } else {
            1.0 / gene.prior.normal_var
        };
    }
    h
}

fn invert(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut inv = vec![0.0; n * n];
    for col in 0..n {
        let mut e = vec![0.0; n];
        e[col] = 1.0;
        let x = solve(a, &e, n)?;
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    Some(inv)
}

/// Method-of-moments prior variance of the true effects given MLEs and
/// their standard errors (natural log scale), bounded to `[1e-6, 400]`
fn prior_variance(mle: &[(f64, f64)]) -> f64 {
    const MIN_VAR: f64 = 1e-6;
    const MAX_VAR: f64 = 400.0;

    let valid: Vec<(f64, f64)> = mle
        .iter()
        .filter(|(b, se)| b.is_finite() && se.is_finite() && *se > 0.0)
        .map(|&(b, se)| (b * b, se * se))
        .collect();
    if valid.is_empty() {
        return MIN_VAR;
    }

    // fixed point of a = sum((b^2 - d) w) / sum(w), w = 1 / (2 (a + d)^2)
    let objective = |a: f64| -> f64 {
        let (num, den) = valid.iter().fold((0.0, 0.0), |(num, den), &(s, d)| {
            let w = 1.0 / (2.0 * (a + d).powi(2));
            (num + (s - d) * w, den + w)
        });
        num / den - a
    };

    let (mut lo, mut hi) = (MIN_VAR, MAX_VAR);
    let (f_lo, f_hi) = (objective(lo), objective(hi));
    if f_lo < 0.0 {
        return MIN_VAR;
    }
    if f_hi > 0.0 {
        return MAX_VAR;
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if objective(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// s-value: running mean of the sorted false sign rates
fn svalue(fsr: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..fsr.len()).filter(|&i| fsr[i].is_finite()).collect();
    order.sort_by(|&a, &b| fsr[a].total_cmp(&fsr[b]));

    let mut out = vec![f64::NAN; fsr.len()];
    let mut running = 0.0;
    for (rank, &i) in order.iter().enumerate() {
        running += fsr[i];
        out[i] = running / (rank + 1) as f64;
    }
    out
}
