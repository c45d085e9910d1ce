//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use cirrus_core::upload::{PartTag, UploadId};
use std::path::Path;

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Backend version marker (if available).
    pub etag: Option<String>,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Object store abstraction consumed by the cache and streaming layers.
///
/// All operations are keyed by an opaque backend-specific object key.
/// Timeouts and retries live inside implementations; callers see either
/// success or a final [`crate::StorageError`], never a masked failure.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Get an object's size and version markers without fetching content.
    async fn stat(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get `length` bytes starting at `offset`.
    ///
    /// A response shorter than `length` means the range ran past the end of
    /// the object; callers treat it as an EOF signal, not an error.
    async fn get_range(&self, key: &str, offset: u64, length: u64) -> StorageResult<Bytes>;

    /// Download the whole object to a local file.
    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()>;

    /// Put a whole object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Upload a local file as a whole object.
    async fn upload(
        &self,
        src: &Path,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Start a multipart upload.
    async fn create_multipart(&self, key: &str) -> StorageResult<UploadId>;

    /// Upload one part. `index` is 1-based and strictly increasing.
    async fn put_part(
        &self,
        key: &str,
        upload: &UploadId,
        index: u32,
        data: Bytes,
    ) -> StorageResult<PartTag>;

    /// Commit a multipart upload from its ordered part tags.
    async fn complete_multipart(
        &self,
        key: &str,
        upload: &UploadId,
        parts: Vec<PartTag>,
    ) -> StorageResult<()>;

    /// Abandon a multipart upload and discard staged parts.
    async fn abort_multipart(&self, key: &str, upload: &UploadId) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Static identifier for the backend type, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
