//! Negative binomial generalized linear models

mod design;
mod fitting;
mod negative_binomial;

pub use design::{build_design, check_full_rank, contrast_vector, intercept_only, Design, DesignInfo};
pub use fitting::{default_ridge, fit_gene, fit_glm, fit_glm_with_prior, GeneFit, GlmFit, GlmFitParams};
pub use negative_binomial::{
    nb_deviance, nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU,
};
