//! Client error taxonomy.

use cirrus_core::upload::UploadId;
use cirrus_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by cache and streaming operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote object does not exist. Kept distinct from transport
    /// failures so callers can implement existence checks.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A second in-process writer was opened on a key already being written.
    #[error("object is already open for writing in this process: {0}")]
    Busy(String),

    /// The operation is not supported by this handle.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A backend call failed after the backend's own retry policy was
    /// exhausted. Propagated unchanged, never masked as success.
    #[error("storage backend error: {0}")]
    Storage(#[source] StorageError),

    /// Multipart completion failed after parts were staged: data may be
    /// partially uploaded and unreachable until cleaned up out of band.
    #[error("incomplete upload of {key} (upload {upload_id}): {source}")]
    IncompleteUpload {
        key: String,
        upload_id: UploadId,
        #[source]
        source: Box<StorageError>,
    },

    /// Local disk failure. Always fatal, never retried.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Text-mode decoding failure.
    #[error("invalid UTF-8 in text stream: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            StorageError::Io(e) => Self::Io(e),
            other => Self::Storage(other),
        }
    }
}

impl From<cirrus_core::Error> for Error {
    fn from(err: cirrus_core::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
