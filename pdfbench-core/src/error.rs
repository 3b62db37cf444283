use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{tool} does not support {capability}")]
    Unsupported { tool: String, capability: String },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Process error: {0}")]
    Process(String),

    #[error("Comparison error: {0}")]
    Comparison(String),
}

impl BenchError {
    /// Whether this error represents an exceeded deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, BenchError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
