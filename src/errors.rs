use std::path::PathBuf;
use thiserror::Error;

use super::records::CardId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Column `{column}` missing or mistyped in {path}")]
    Column { path: PathBuf, column: &'static str },

    #[error("Required input not found: {0}")]
    MissingInput(PathBuf),

    #[error("Batches failed: {0:?}")]
    BatchesFailed(Vec<u32>),

    #[error("Interrupted")]
    Interrupted,
}

/// Failure while clustering a single card. Caught at the per-card
/// boundary; the batch carries on with the next card.
#[derive(Error, Debug, PartialEq)]
pub enum ClusterError {
    #[error("Sample for card {found} found in the candidate set of card {expected}")]
    ForeignSample { expected: CardId, found: CardId },

    #[error("Dominant cluster of card {0} contains a point without a stop id")]
    MissingStopId(CardId),
}
