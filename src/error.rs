//! Error types for instruct-engine.
//!
//! These cover infrastructure faults (config, storage, taxonomy loading).
//! Attempt-level outcomes such as parse or validation failures are plain
//! values owned by their modules and never surface through this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("taxonomy error: {0}")]
    Taxonomy(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
