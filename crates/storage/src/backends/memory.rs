//! In-memory storage backend.
//!
//! Primarily a test double: every trait operation increments a counter so
//! tests can assert exact call counts (cache hits that skip the network,
//! no-op uploads, and so on). `fail_next_complete` injects a completion
//! failure for the incomplete-upload path.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use cirrus_core::upload::{PartTag, UploadId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: time::OffsetDateTime,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: Vec<(u32, Bytes)>,
}

/// Snapshot of per-operation call counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub stat: usize,
    pub get_range: usize,
    pub download: usize,
    pub put: usize,
    pub upload: usize,
    pub create_multipart: usize,
    pub put_part: usize,
    pub complete_multipart: usize,
    pub abort_multipart: usize,
    pub delete: usize,
}

impl OpCounts {
    /// Total whole-object transfers to the backend (uploads of any shape).
    pub fn total_uploads(&self) -> usize {
        self.put + self.upload + self.complete_multipart
    }
}

#[derive(Debug, Default)]
struct Counters {
    stat: AtomicUsize,
    get_range: AtomicUsize,
    download: AtomicUsize,
    put: AtomicUsize,
    upload: AtomicUsize,
    create_multipart: AtomicUsize,
    put_part: AtomicUsize,
    complete_multipart: AtomicUsize,
    abort_multipart: AtomicUsize,
    delete: AtomicUsize,
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, StoredObject>>,
    uploads: RwLock<HashMap<String, PendingUpload>>,
    counters: Counters,
    fail_next_complete: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the operation counters.
    pub fn op_counts(&self) -> OpCounts {
        OpCounts {
            stat: self.counters.stat.load(Ordering::Relaxed),
            get_range: self.counters.get_range.load(Ordering::Relaxed),
            download: self.counters.download.load(Ordering::Relaxed),
            put: self.counters.put.load(Ordering::Relaxed),
            upload: self.counters.upload.load(Ordering::Relaxed),
            create_multipart: self.counters.create_multipart.load(Ordering::Relaxed),
            put_part: self.counters.put_part.load(Ordering::Relaxed),
            complete_multipart: self.counters.complete_multipart.load(Ordering::Relaxed),
            abort_multipart: self.counters.abort_multipart.load(Ordering::Relaxed),
            delete: self.counters.delete.load(Ordering::Relaxed),
        }
    }

    /// Make the next `complete_multipart` call fail with a transport error.
    pub fn fail_next_complete(&self) {
        self.fail_next_complete.store(true, Ordering::SeqCst);
    }

    /// Insert an object directly, bypassing the counters.
    pub async fn seed(&self, key: &str, data: impl Into<Bytes>) {
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), StoredObject::new(data.into()));
    }

    /// Read an object's bytes directly, bypassing the counters.
    pub async fn contents(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).map(|o| o.data.clone())
    }

    async fn store(&self, key: &str, data: Bytes) {
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), StoredObject::new(data));
    }
}

impl StoredObject {
    fn new(data: Bytes) -> Self {
        Self {
            data,
            etag: uuid::Uuid::new_v4().to_string(),
            last_modified: time::OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn stat(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.counters.stat.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
        })
    }

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> StorageResult<Bytes> {
        self.counters.get_range.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let size = object.data.len() as u64;
        if offset >= size {
            return Ok(Bytes::new());
        }
        let start = offset as usize;
        let end = size.min(offset.saturating_add(length)) as usize;
        Ok(object.data.slice(start..end))
    }

    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()> {
        self.counters.download.fetch_add(1, Ordering::Relaxed);
        let data = {
            let objects = self.objects.read().await;
            objects
                .get(key)
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?
                .data
                .clone()
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &data).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.counters.put.fetch_add(1, Ordering::Relaxed);
        self.store(key, data).await;
        Ok(())
    }

    async fn upload(
        &self,
        src: &Path,
        key: &str,
        _content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.counters.upload.fetch_add(1, Ordering::Relaxed);
        let data = tokio::fs::read(src).await?;
        self.store(key, Bytes::from(data)).await;
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> StorageResult<UploadId> {
        self.counters.create_multipart.fetch_add(1, Ordering::Relaxed);
        let upload = UploadId::new();
        let mut uploads = self.uploads.write().await;
        uploads.insert(
            upload.to_string(),
            PendingUpload {
                key: key.to_string(),
                parts: Vec::new(),
            },
        );
        Ok(upload)
    }

    async fn put_part(
        &self,
        _key: &str,
        upload: &UploadId,
        index: u32,
        data: Bytes,
    ) -> StorageResult<PartTag> {
        self.counters.put_part.fetch_add(1, Ordering::Relaxed);
        let mut uploads = self.uploads.write().await;
        let pending = uploads
            .get_mut(upload.as_str())
            .ok_or_else(|| StorageError::NoSuchUpload(upload.to_string()))?;
        pending.parts.push((index, data));
        Ok(PartTag::new(index, format!("mem-{index}")))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload: &UploadId,
        parts: Vec<PartTag>,
    ) -> StorageResult<()> {
        self.counters.complete_multipart.fetch_add(1, Ordering::Relaxed);
        if self.fail_next_complete.swap(false, Ordering::SeqCst) {
            return Err(StorageError::transport(std::io::Error::other(
                "injected completion failure",
            )));
        }

        let pending = {
            let mut uploads = self.uploads.write().await;
            uploads
                .remove(upload.as_str())
                .ok_or_else(|| StorageError::NoSuchUpload(upload.to_string()))?
        };
        if pending.key != key {
            return Err(StorageError::NoSuchUpload(format!(
                "upload {upload} belongs to key {}",
                pending.key
            )));
        }

        let staged: HashMap<u32, Bytes> = pending.parts.into_iter().collect();
        let mut assembled = Vec::new();
        for part in &parts {
            let data = staged.get(&part.index).ok_or_else(|| {
                StorageError::NoSuchUpload(format!("upload {upload} is missing part {}", part.index))
            })?;
            assembled.extend_from_slice(data);
        }

        self.store(key, Bytes::from(assembled)).await;
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload: &UploadId) -> StorageResult<()> {
        self.counters.abort_multipart.fetch_add(1, Ordering::Relaxed);
        let mut uploads = self.uploads.write().await;
        uploads
            .remove(upload.as_str())
            .ok_or_else(|| StorageError::NoSuchUpload(upload.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.counters.delete.fetch_add(1, Ordering::Relaxed);
        let mut objects = self.objects.write().await;
        objects
            .remove(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
