//! Quantification outputs: salmon tables and gene-level summarization

mod salmon;
mod tx2gene;
mod tximport;

pub use salmon::{load_samples, read_quant_sf, QuantRecord, TranscriptQuant};
pub use tx2gene::Tx2Gene;
pub use tximport::{summarize_to_genes, GeneAbundance};
