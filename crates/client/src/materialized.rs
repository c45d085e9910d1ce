//! File handles backed by materialized cache files.

use crate::cache::{CacheStore, WriterGuard};
use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Random-access read handle over a materialized cache file.
pub struct MaterializedFile {
    file: tokio::fs::File,
    path: PathBuf,
    key: String,
    cache: Arc<CacheStore>,
    evict_on_close: bool,
}

impl MaterializedFile {
    pub(crate) async fn open(
        cache: Arc<CacheStore>,
        key: &str,
        force_refresh: bool,
        evict_on_close: bool,
    ) -> Result<Self> {
        let path = cache.materialize(key, force_refresh).await?;
        let file = tokio::fs::File::open(&path).await?;
        Ok(Self {
            file,
            path,
            key: key.to_string(),
            cache,
            evict_on_close,
        })
    }

    /// Read up to `n` bytes; shorter results only occur at EOF.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.file.read(&mut buf[filled..]).await?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    /// Read into a caller-supplied buffer, returning the byte count.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf).await?)
    }

    /// Read everything from the current position to EOF.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.file.read_to_end(&mut out).await?;
        Ok(out)
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos).await?)
    }

    pub async fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position().await?)
    }

    /// Path of the backing cache file.
    pub fn local_path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) -> Result<()> {
        drop(self.file);
        if self.evict_on_close {
            self.cache.evict(&self.key).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for MaterializedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedFile")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("evict_on_close", &self.evict_on_close)
            .finish_non_exhaustive()
    }
}

/// Write handle over a cache file, uploaded on close.
///
/// Creation truncates the cache file and takes the in-process writer lock
/// for the key; a second concurrent writer fails with `Busy` before any
/// bytes move. If the process dies before `close`, the partial local file
/// is retained but nothing is uploaded.
pub struct MaterializedWriter {
    file: tokio::fs::File,
    path: PathBuf,
    key: String,
    cache: Arc<CacheStore>,
    opened_at: Option<SystemTime>,
    force_upload: bool,
    evict_on_close: bool,
    guard: WriterGuard,
}

impl MaterializedWriter {
    pub(crate) async fn create(
        cache: Arc<CacheStore>,
        key: &str,
        force_upload: bool,
        evict_on_close: bool,
    ) -> Result<Self> {
        let guard = cache.lock_writer(key)?;
        let path = cache.local_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::File::create(&path).await?;
        let opened_at = file.metadata().await?.modified().ok();

        Ok(Self {
            file,
            path,
            key: key.to_string(),
            cache,
            opened_at,
            force_upload,
            evict_on_close,
            guard,
        })
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file.write_all(data).await?;
        Ok(data.len())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos).await?)
    }

    pub async fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position().await?)
    }

    pub fn local_path(&self) -> &Path {
        &self.path
    }

    /// Flush, sync, and upload the cache file if it changed since open.
    pub async fn close(self) -> Result<()> {
        let Self {
            mut file,
            key,
            cache,
            opened_at,
            force_upload,
            evict_on_close,
            guard,
            ..
        } = self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let uploaded = cache.upload_if_changed(&key, opened_at, force_upload).await?;
        drop(guard);

        if !uploaded || evict_on_close {
            // On a skipped upload the truncated cache file no longer matches
            // the remote; its mtime alone would pass the freshness fallback,
            // so the file itself must go for the next read to re-materialize.
            cache.evict(&key).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for MaterializedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedWriter")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("force_upload", &self.force_upload)
            .field("evict_on_close", &self.evict_on_close)
            .finish_non_exhaustive()
    }
}
