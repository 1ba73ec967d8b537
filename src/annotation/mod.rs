//! Gene symbol annotation and significance calls

mod significance;
mod symbols;

pub use significance::{flag, split, RegulatedGenes, Thresholds};
pub use symbols::{annotate, strip_version, SymbolMap};
