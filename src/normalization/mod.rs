//! Library size and gene length normalization

mod size_factors;

pub use size_factors::{estimate_normalization_factors, estimate_size_factors};
