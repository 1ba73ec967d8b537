//! Error types for the RNA-seq pipeline

use thiserror::Error;

/// Main error type for every pipeline stage
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid sample sheet: {reason}")]
    InvalidSampleSheet { reason: String },

    #[error("Samples do not match quantification outputs: missing {missing:?}, unexpected {unexpected:?}")]
    SampleMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesign { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionEstimationFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Invalid quantification output {path}: {reason}")]
    InvalidQuant { path: String, reason: String },

    #[error("Invalid gene sets: {reason}")]
    InvalidGeneSets { reason: String },

    #[error("`{program}` not found on PATH")]
    ToolNotFound { program: String },

    #[error("`{command}` exited with status {status}: {stderr}")]
    ToolFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Plotting failed for {path}: {reason}")]
    Plot { path: String, reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("FASTQ error: {0}")]
    FastqError(#[from] bio::io::fastq::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
