//! Sample sheet, count tables and the per-design analysis container

mod count_matrix;
mod dataset;
mod metadata;
mod samples;

pub use count_matrix::CountMatrix;
pub use dataset::CountDataSet;
pub use metadata::SampleMetadata;
pub use samples::{Sample, SampleSheet, GROUP_FACTOR, TREATMENT_FACTOR};
