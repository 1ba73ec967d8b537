//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during IRLS
pub const MIN_MU: f64 = 0.5;

/// Any |beta| (natural log scale) above this stops IRLS for the gene
pub const MAX_LFC_BETA: f64 = 30.0;

/// Clamp on the linear predictor to keep `exp` finite
pub const MAX_ETA: f64 = 700.0;

/// mu = nf * exp(eta)
pub fn nb_mean(eta: f64, normalization_factor: f64) -> f64 {
    normalization_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// Log density of `y` under NB with mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}

/// IRLS weight mu / (1 + alpha mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// -2 log-likelihood summed over samples
pub fn nb_deviance(counts: &[f64], mu: &[f64], alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| -2.0 * nb_log_likelihood(y, m, alpha))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_mean() {
        assert!((nb_mean(2.0, 1.0) - 2.0_f64.exp()).abs() < 1e-10);
        assert!((nb_mean(0.0, 3.0) - 3.0).abs() < 1e-12);
        assert!(nb_mean(1e6, 1.0).is_finite());
    }

    #[test]
    fn test_nb_variance_and_weight() {
        assert!((nb_variance(10.0, 0.1) - 20.0).abs() < 1e-10);
        assert!((nb_weight(10.0, 0.1) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_log_likelihood_approaches_poisson() {
        // Poisson(5) at 5: 5 ln 5 - 5 - ln 120
        let poisson = 5.0 * 5.0_f64.ln() - 5.0 - 120.0_f64.ln();
        assert!((nb_log_likelihood(5.0, 5.0, 1e-8) - poisson).abs() < 1e-5);
        assert_eq!(nb_log_likelihood(1.0, 0.0, 0.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_deviance_is_positive() {
        let dev = nb_deviance(&[3.0, 7.0], &[5.0, 5.0], 0.1);
        assert!(dev > 0.0 && dev.is_finite());
    }
}
