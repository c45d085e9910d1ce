//! Local cache of materialized remote objects.
//!
//! The cache owns a directory tree mirroring remote key hierarchies. No
//! metadata file is kept on disk: staleness is decided by comparing a live
//! `stat()` against the entry recorded in-process, falling back to the local
//! file's mtime so a fresh process can reuse files materialized by an
//! earlier run. After every transfer the local file's mtime is pinned to the
//! remote mtime, which is what makes that comparison meaningful.

use crate::error::{Error, Result};
use cirrus_core::config::ContentTypeFn;
use cirrus_storage::{ObjectMeta, ObjectStore, StorageError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Bookkeeping for one cached file.
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
    pub remote_etag: Option<String>,
    pub remote_mtime: Option<time::OffsetDateTime>,
    pub size: u64,
}

/// Releases the per-key writer lock on drop.
#[derive(Debug)]
pub(crate) struct WriterGuard {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.key);
        }
    }
}

/// Process-local store of materialized objects.
pub(crate) struct CacheStore {
    root: PathBuf,
    backend: Arc<dyn ObjectStore>,
    content_type: Option<ContentTypeFn>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    active_writers: Arc<Mutex<HashSet<String>>>,
}

impl CacheStore {
    pub fn new(
        root: PathBuf,
        backend: Arc<dyn ObjectStore>,
        content_type: Option<ContentTypeFn>,
    ) -> Self {
        Self {
            root,
            backend,
            content_type,
            entries: Mutex::new(HashMap::new()),
            active_writers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Map a key to its cache file path, mirroring the remote hierarchy.
    pub fn local_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(Error::Storage(StorageError::InvalidKey(
                "empty key".to_string(),
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(Error::Storage(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    ))));
                }
            }
        }
        Ok(self.root.join(key))
    }

    /// The cached file for `key`, if one is present on disk.
    pub fn get_cached_path(&self, key: &str) -> Option<PathBuf> {
        let path = self.local_path(key).ok()?;
        path.exists().then_some(path)
    }

    /// Ensure `key` is materialized locally, returning the cache file path.
    ///
    /// A fresh `stat()` is issued every time; a vanished remote object
    /// surfaces as NotFound even when a stale cache file exists.
    pub async fn materialize(&self, key: &str, force_refresh: bool) -> Result<PathBuf> {
        let meta = self.backend.stat(key).await?;
        let local = self.local_path(key)?;

        if !force_refresh && self.is_fresh(key, &local, &meta) {
            debug!(key, path = %local.display(), "cache hit");
            return Ok(local);
        }

        debug!(key, size = meta.size, "cache miss; downloading");
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.backend.download(key, &local).await?;
        self.pin_mtime(&local, &meta)?;
        self.record_entry(key, &meta)?;
        Ok(local)
    }

    /// Whether the cached file for `key` still matches `meta`.
    fn is_fresh(&self, key: &str, local: &Path, meta: &ObjectMeta) -> bool {
        if !local.exists() {
            return false;
        }

        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        if let Some(entry) = entries.get(key) {
            // Prefer etag comparison when both sides carry one.
            if let (Some(recorded), Some(live)) = (&entry.remote_etag, &meta.etag) {
                return recorded == live;
            }
            return entry.remote_mtime == meta.last_modified && entry.size == meta.size;
        }
        drop(entries);

        // No in-process entry (file left by an earlier run): the file is
        // usable iff its mtime, pinned to the remote mtime at download
        // time, is not older than the remote.
        match (file_mtime(local), meta.last_modified) {
            (Some(local_mtime), Some(remote_mtime)) => {
                local_mtime >= SystemTime::from(remote_mtime)
            }
            _ => false,
        }
    }

    /// Upload the cached file for `key` unless it is unchanged since
    /// `opened_at`. Returns whether an upload happened.
    pub async fn upload_if_changed(
        &self,
        key: &str,
        opened_at: Option<SystemTime>,
        force: bool,
    ) -> Result<bool> {
        let local = self.local_path(key)?;
        let current = file_mtime(&local)
            .ok_or_else(|| Error::Io(std::io::Error::other("cache file mtime unavailable")))?;

        if !force && opened_at == Some(current) && self.backend.exists(key).await? {
            debug!(key, "upload skipped; cache file unchanged since open");
            return Ok(false);
        }

        let content_type = self.content_type.as_ref().and_then(|guess| guess(key));
        self.backend
            .upload(&local, key, content_type.as_deref())
            .await?;

        // Re-stat so the entry records the remote's version markers and the
        // local mtime is pinned to the remote one.
        let meta = self.backend.stat(key).await?;
        self.pin_mtime(&local, &meta)?;
        self.record_entry(key, &meta)?;
        debug!(key, size = meta.size, "uploaded cache file");
        Ok(true)
    }

    /// Take the in-process writer lock for `key`.
    pub fn lock_writer(&self, key: &str) -> Result<WriterGuard> {
        let mut active = self
            .active_writers
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("writer lock poisoned")))?;
        if !active.insert(key.to_string()) {
            return Err(Error::Busy(key.to_string()));
        }
        Ok(WriterGuard {
            key: key.to_string(),
            active: Arc::clone(&self.active_writers),
        })
    }

    fn writer_active(&self, key: &str) -> bool {
        self.active_writers
            .lock()
            .map(|active| active.contains(key))
            .unwrap_or(false)
    }

    /// Drop the bookkeeping entry without touching the file.
    pub fn forget_entry(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Remove the cached file and entry for `key`.
    ///
    /// A key with an open writer is never evicted.
    pub async fn evict(&self, key: &str) -> Result<()> {
        if self.writer_active(key) {
            warn!(key, "eviction skipped; key has an open writer");
            return Ok(());
        }
        self.forget_entry(key);
        let path = self.local_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Synchronous eviction for drop paths.
    pub fn evict_blocking(&self, key: &str) {
        if self.writer_active(key) {
            return;
        }
        self.forget_entry(key);
        if let Ok(path) = self.local_path(key) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key, error = %e, "failed to evict cache file");
                }
            }
        }
    }

    /// Delete everything under the cache root and clear all entries.
    pub async fn reset_all(&self) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }

        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        };
        while let Some(child) = dir.next_entry().await? {
            let path = child.path();
            if child.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        debug!(root = %self.root.display(), "cache reset");
        Ok(())
    }

    fn record_entry(&self, key: &str, meta: &ObjectMeta) -> Result<()> {
        let entry = CacheEntry {
            remote_etag: meta.etag.clone(),
            remote_mtime: meta.last_modified,
            size: meta.size,
        };
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("cache entry lock poisoned")))?;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    /// Pin the local file's mtime to the remote mtime so staleness checks
    /// survive process restarts.
    fn pin_mtime(&self, local: &Path, meta: &ObjectMeta) -> Result<()> {
        if let Some(remote_mtime) = meta.last_modified {
            let file = std::fs::OpenOptions::new().write(true).open(local)?;
            file.set_modified(SystemTime::from(remote_mtime))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn entry_size(&self, key: &str) -> Option<u64> {
        self.entries.lock().ok()?.get(key).map(|e| e.size)
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}
