//! Error types for brainmap operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while decoding a volume archive
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported element type: {0}")]
    UnsupportedElementType(String),

    #[error("Size mismatch: header declares {expected} payload bytes, archive holds {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Cannot clamp negative values: volume has no non-negative value")]
    NoNonNegativeValues,

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the remote dataset / ontology service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Bad query, server returned: {0}")]
    BadResponse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Dataset {0} could not be materialized: {1}")]
    Materialize(u64, String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the dataset loader
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("{0} is not available locally or for download")]
    Unavailable(String),

    #[error("{key} was downloaded but could not be decoded: {source}")]
    DecodeAfterFetch {
        key: String,
        #[source]
        source: DecodeError,
    },

    #[error("Local archive for {key} could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: DecodeError,
    },

    #[error("{0} is not a folder")]
    NotADirectory(PathBuf),

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid loader configuration: {0}")]
    InvalidConfig(String),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Timed out fetching {0}")]
    TimedOut(String),

    #[error("Decode task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for volume access and crate-level operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("No color table: attach a taxonomy first")]
    NoColorTable,

    #[error("Not a label volume")]
    NotALabelVolume,

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Invalid axis: {0}")]
    InvalidAxis(usize),

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Structure not found: {0}")]
    StructureNotFound(u32),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Specialized Result type for brainmap operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Serialization(err.to_string())
    }
}
