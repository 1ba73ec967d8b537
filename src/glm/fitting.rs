//! Negative binomial GLM fitting by iteratively reweighted least squares

use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;

use super::negative_binomial::{nb_deviance, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};
use crate::data::CountDataSet;
use crate::error::Result;
use crate::linalg::{cholesky_solve, invert_symmetric, weighted_cross_product, weighted_cross_response};

/// Ridge applied to every coefficient of an unpenalized fit (natural log scale)
pub fn default_ridge() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

#[derive(Debug, Clone)]
pub struct GlmFitParams {
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit of one gene; coefficients on the natural log scale
#[derive(Debug, Clone)]
pub struct GeneFit {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    /// Flat row-major p x p sandwich covariance
    pub covariance: Vec<f64>,
    pub hat_diagonals: Vec<f64>,
    pub mu: Vec<f64>,
    pub deviance: f64,
    pub converged: bool,
}

impl GeneFit {
    fn missing(n_samples: usize, n_coefs: usize) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            standard_errors: vec![f64::NAN; n_coefs],
            covariance: vec![f64::NAN; n_coefs * n_coefs],
            hat_diagonals: vec![f64::NAN; n_samples],
            mu: vec![0.0; n_samples],
            deviance: f64::NAN,
            converged: true,
        }
    }
}

/// Per-gene fits for a whole dataset
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// genes x coefficients, natural log scale
    pub coefficients: Array2<f64>,
    pub standard_errors: Array2<f64>,
    /// genes x p x p
    pub covariances: Array3<f64>,
    /// genes x samples
    pub hat_diagonals: Array2<f64>,
    pub mu: Array2<f64>,
    pub deviance: Array1<f64>,
    pub converged: Vec<bool>,
}

impl GlmFit {
    fn from_genes(fits: Vec<GeneFit>, n_samples: usize, n_coefs: usize) -> Self {
        let n_genes = fits.len();
        let mut out = Self {
            coefficients: Array2::zeros((n_genes, n_coefs)),
            standard_errors: Array2::zeros((n_genes, n_coefs)),
            covariances: Array3::zeros((n_genes, n_coefs, n_coefs)),
            hat_diagonals: Array2::zeros((n_genes, n_samples)),
            mu: Array2::zeros((n_genes, n_samples)),
            deviance: Array1::zeros(n_genes),
            converged: Vec::with_capacity(n_genes),
        };
        for (i, fit) in fits.into_iter().enumerate() {
            for j in 0..n_coefs {
                out.coefficients[[i, j]] = fit.coefficients[j];
                out.standard_errors[[i, j]] = fit.standard_errors[j];
                for k in 0..n_coefs {
                    out.covariances[[i, j, k]] = fit.covariance[j * n_coefs + k];
                }
            }
            for j in 0..n_samples {
                out.hat_diagonals[[i, j]] = fit.hat_diagonals[j];
                out.mu[[i, j]] = fit.mu[j];
            }
            out.deviance[i] = fit.deviance;
            out.converged.push(fit.converged);
        }
        out
    }

    /// Covariance matrix of gene `i` as a flat row-major buffer
    pub fn covariance(&self, i: usize) -> Vec<f64> {
        self.covariances.index_axis(ndarray::Axis(0), i).iter().copied().collect()
    }
}

fn fitted_means(design: &Array2<f64>, beta: &[f64], nf: &[f64], mu: &mut [f64]) {
    for (i, m) in mu.iter_mut().enumerate() {
        let eta: f64 = beta.iter().enumerate().map(|(j, b)| design[[i, j]] * b).sum();
        *m = nb_mean(eta, nf[i]).max(MIN_MU);
    }
}

/// IRLS fit of a single gene with per-coefficient ridge `lambda`
pub fn fit_gene(
    counts: &[f64],
    nf: &[f64],
    design: &Array2<f64>,
    alpha: f64,
    lambda: &[f64],
    params: &GlmFitParams,
) -> GeneFit {
    let n = counts.len();
    let p = design.ncols();

    // OLS start on log normalized counts
    let log_norm: Vec<f64> = counts
        .iter()
        .zip(nf)
        .map(|(&y, &f)| (y / f + 0.1).ln())
        .collect();
    let ones = vec![1.0; n];
    let mut beta = cholesky_solve(
        &weighted_cross_product(design, &ones),
        &weighted_cross_response(design, &ones, &log_norm),
        p,
    );

    let mut mu = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut dev_old = 0.0;
    let mut converged = false;

    for iter in 0..params.maxit {
        fitted_means(design, &beta, nf, &mut mu);
        for i in 0..n {
            weights[i] = nb_weight(mu[i], alpha);
            z[i] = (mu[i] / nf[i]).ln() + (counts[i] - mu[i]) / mu[i];
        }

        let mut xtwx = weighted_cross_product(design, &weights);
        for (j, l) in lambda.iter().enumerate() {
            xtwx[j * p + j] += l;
        }
        beta = cholesky_solve(&xtwx, &weighted_cross_response(design, &weights, &z), p);
        if beta.iter().any(|b| !b.is_finite() || b.abs() > MAX_LFC_BETA) {
            break;
        }

        fitted_means(design, &beta, nf, &mut mu);
        let dev = nb_deviance(counts, &mu, alpha);
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    fitted_means(design, &beta, nf, &mut mu);
    for i in 0..n {
        weights[i] = nb_weight(mu[i], alpha);
    }

    // sandwich covariance (X'WX + L)^-1 X'WX (X'WX + L)^-1
    let xtwx = weighted_cross_product(design, &weights);
    let mut ridged = xtwx.clone();
    for (j, l) in lambda.iter().enumerate() {
        ridged[j * p + j] += l;
    }
    let inv = invert_symmetric(&ridged, p);
    let mut covariance = vec![0.0; p * p];
    for a in 0..p {
        for b in 0..p {
            let mut s = 0.0;
            for k in 0..p {
                for l in 0..p {
                    s += inv[a * p + k] * xtwx[k * p + l] * inv[l * p + b];
                }
            }
            covariance[a * p + b] = s;
        }
    }
    let standard_errors = (0..p)
        .map(|j| {
            let v = covariance[j * p + j];
            if v > 0.0 {
                v.sqrt()
            } else {
                f64::NAN
            }
        })
        .collect();

    let hat_diagonals = (0..n)
        .map(|i| {
            let x = design.row(i);
            let mut h = 0.0;
            for a in 0..p {
                for b in 0..p {
                    h += x[a] * inv[a * p + b] * x[b];
                }
            }
            weights[i] * h
        })
        .collect();

    let deviance = nb_deviance(counts, &mu, alpha);
    GeneFit {
        coefficients: beta,
        standard_errors,
        covariance,
        hat_diagonals,
        mu,
        deviance,
        converged,
    }
}

fn fit_all(dds: &CountDataSet, lambda: &[f64], params: &GlmFitParams) -> Result<GlmFit> {
    let nf = dds.require_normalization_factors()?;
    let dispersions = &dds.require_dispersions()?.final_dispersions;
    let design = dds.design_matrix();
    let counts = dds.counts().counts();
    let (n_samples, n_coefs) = design.dim();

    let fits: Vec<GeneFit> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let y: Vec<f64> = counts.row(i).to_vec();
            let alpha = dispersions[i];
            if y.iter().all(|&c| c == 0.0) || !alpha.is_finite() {
                return GeneFit::missing(n_samples, n_coefs);
            }
            let f: Vec<f64> = nf.row(i).to_vec();
            fit_gene(&y, &f, design, alpha, lambda, params)
        })
        .collect();

    let fit = GlmFit::from_genes(fits, n_samples, n_coefs);
    let failed = fit.converged.iter().filter(|c| !**c).count();
    if failed > 0 {
        log::warn!("{} genes did not converge in the GLM fit", failed);
    }
    Ok(fit)
}

/// Fit the dataset's design to every gene and store the result
pub fn fit_glm(dds: &mut CountDataSet, params: &GlmFitParams) -> Result<()> {
    let lambda = vec![default_ridge(); dds.design().n_coefs()];
    log::info!(
        "Fitting NB GLM ({} coefficients) to {} genes",
        lambda.len(),
        dds.n_genes()
    );
    let fit = fit_all(dds, &lambda, params)?;
    dds.set_fit(fit)
}

/// Refit with a zero-centered normal prior on each coefficient, given as
/// ridge penalties `lambda` on the natural log scale
pub fn fit_glm_with_prior(dds: &CountDataSet, lambda: &[f64], params: &GlmFitParams) -> Result<GlmFit> {
    fit_all(dds, lambda, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::intercept_only;
    use ndarray::array;

    fn two_group() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_recovers_group_means() {
        let counts = [100.0, 110.0, 90.0, 400.0, 420.0, 380.0];
        let nf = [1.0; 6];
        let lambda = vec![default_ridge(); 2];
        let fit = fit_gene(&counts, &nf, &two_group(), 0.01, &lambda, &GlmFitParams::default());
        assert!(fit.converged);
        assert!((fit.coefficients[0] - 100.0_f64.ln()).abs() < 1e-4);
        assert!((fit.coefficients[1] - 4.0_f64.ln()).abs() < 1e-4);
        assert!(fit.standard_errors.iter().all(|s| s.is_finite() && *s > 0.0));
        // hat values of a cell-means design sum to p
        let h: f64 = fit.hat_diagonals.iter().sum();
        assert!((h - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_normalization_factors_offset() {
        let counts = [100.0, 200.0, 50.0, 100.0];
        let nf = [1.0, 2.0, 0.5, 1.0];
        let fit = fit_gene(
            &counts,
            &nf,
            &intercept_only(4).matrix,
            0.01,
            &[default_ridge()],
            &GlmFitParams::default(),
        );
        assert!((fit.coefficients[0] - 100.0_f64.ln()).abs() < 1e-4);
    }

    #[test]
    fn test_strong_ridge_shrinks_toward_zero() {
        let counts = [100.0, 110.0, 90.0, 400.0, 420.0, 380.0];
        let weak = fit_gene(&counts, &[1.0; 6], &two_group(), 0.01, &[1e-6, 1e-6], &GlmFitParams::default());
        let strong = fit_gene(&counts, &[1.0; 6], &two_group(), 0.01, &[1e-6, 50.0], &GlmFitParams::default());
        assert!(strong.coefficients[1].abs() < weak.coefficients[1].abs());
    }
}
