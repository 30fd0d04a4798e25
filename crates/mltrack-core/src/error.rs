//! Error types for mltrack-core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error envelope returned by the tracking server that has no dedicated variant.
    #[error("Tracking server error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Resource does not exist: {0}")]
    ResourceDoesNotExist(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported model flavor: {0}")]
    UnsupportedFlavor(String),

    #[error("Model at '{location}' has no '{flavor}' flavor")]
    FlavorNotFound { flavor: String, location: String },

    #[error("Unsupported model serialization format: {0}")]
    UnsupportedSerialization(String),

    #[error("Unsupported URI: {0}")]
    UnsupportedUri(String),

    #[error("Run {0} is not active")]
    RunNotActive(String),

    #[error("Shape mismatch: expected {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

impl TrackingError {
    /// Whether the store reported that the requested entity is unknown.
    pub fn is_not_found(&self) -> bool {
        match self {
            TrackingError::ResourceDoesNotExist(_) => true,
            TrackingError::Api { code, .. } => code == "RESOURCE_DOES_NOT_EXIST",
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
