//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cache mode: {0}")]
    InvalidCacheMode(String),

    #[error("invalid upload ID: {0}")]
    InvalidUploadId(String),

    #[error("illegal upload transition: {from} -> {to}")]
    IllegalUploadTransition { from: &'static str, to: &'static str },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
