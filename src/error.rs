use thiserror::Error;

/// Main error type for encoding, loading and querying networks.
#[derive(Error, Debug)]
pub enum RelunetError {
    // Malformed parameter state or input shape; never recovered from.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    // Storage errors, propagated uninterpreted
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Query error: {0}")]
    Query(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type alias for RelunetError
pub type Result<T> = std::result::Result<T, RelunetError>;

impl RelunetError {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        RelunetError::Precondition(msg.into())
    }
}
