//! Error types for the Tomovox engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("coordinate ({0}, {1}, {2}) out of bounds")]
    OutOfBounds(u32, u32, u32),

    #[error("no volume loaded")]
    NoVolume,

    #[error("operation would produce an empty result")]
    EmptyResult,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("inconsistent series: {0}")]
    InconsistentSeries(String),

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}
