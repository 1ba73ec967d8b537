//! Post-test filtering: Cook's distance outliers and independent filtering

pub mod cooks;
mod independent;

pub use independent::{independent_filtering, FilterThreshold};
