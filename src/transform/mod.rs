//! Transformations of count data for visualization (PCA, heatmaps)

mod vst;

pub use vst::{vst, VstResult};
