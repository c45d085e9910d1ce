//! Local filesystem storage backend.
//!
//! Doubles as the reference backend for integration tests: whole-object
//! puts are atomic (temp file + rename) and multipart uploads are staged as
//! numbered part files that only become visible at completion.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use cirrus_core::upload::{PartTag, UploadId};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Directory under the root where in-flight multipart uploads are staged.
const UPLOADS_DIR: &str = ".cirrus-uploads";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Map a key to a path under the root, rejecting traversal attempts.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "absolute keys not allowed: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    fn upload_dir(&self, upload: &UploadId) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(upload.as_str())
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn map_missing(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        }
    }

    /// Write `data` next to `path` and atomically rename it into place.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        Self::ensure_parent(path).await?;
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stat(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key)?;
        let metadata = fs::metadata(&path).await.map_err(Self::map_missing(key))?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let modified = metadata.modified().ok();
        // Synthesize a weak etag from size + mtime; good enough to detect
        // change between stats on the same filesystem.
        let etag = modified.map(|t| {
            let nanos = t
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            format!("{:x}-{:x}", metadata.len(), nanos)
        });

        Ok(ObjectMeta {
            size: metadata.len(),
            etag,
            last_modified: modified.map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_range(&self, key: &str, offset: u64, length: u64) -> StorageResult<Bytes> {
        let len = usize::try_from(length).map_err(|_| {
            StorageError::InvalidRange(format!(
                "range length {length} exceeds platform address space"
            ))
        })?;

        let path = self.key_path(key)?;
        let mut file = fs::File::open(&path).await.map_err(Self::map_missing(key))?;

        let size = file.metadata().await?.len();
        if offset >= size {
            return Ok(Bytes::new());
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let available = usize::try_from(size - offset)
            .map(|a| a.min(len))
            .unwrap_or(len);
        let mut buf = vec![0u8; available];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let path = self.key_path(key)?;
        Self::ensure_parent(dest).await?;
        fs::copy(&path, dest).await.map_err(Self::map_missing(key))?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key)?;
        Self::write_atomic(&path, &data).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn upload(
        &self,
        src: &Path,
        key: &str,
        _content_type: Option<&str>,
    ) -> StorageResult<()> {
        // Content type has no filesystem representation; accepted and dropped.
        let path = self.key_path(key)?;
        Self::ensure_parent(&path).await?;
        let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        fs::copy(src, &temp_path).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create_multipart(&self, key: &str) -> StorageResult<UploadId> {
        self.key_path(key)?;
        let upload = UploadId::new();
        fs::create_dir_all(self.upload_dir(&upload)).await?;
        Ok(upload)
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put_part(
        &self,
        key: &str,
        upload: &UploadId,
        index: u32,
        data: Bytes,
    ) -> StorageResult<PartTag> {
        let dir = self.upload_dir(upload);
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::NoSuchUpload(upload.to_string()));
        }

        let part_path = dir.join(format!("{index:010}.part"));
        Self::write_atomic(&part_path, &data).await?;
        Ok(PartTag::new(index, format!("fs-{index}")))
    }

    #[instrument(skip(self, parts), fields(backend = "filesystem", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        key: &str,
        upload: &UploadId,
        parts: Vec<PartTag>,
    ) -> StorageResult<()> {
        let dir = self.upload_dir(upload);
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::NoSuchUpload(upload.to_string()));
        }

        let path = self.key_path(key)?;
        Self::ensure_parent(&path).await?;
        let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));

        {
            let mut out = fs::File::create(&temp_path).await?;
            for part in &parts {
                let part_path = dir.join(format!("{:010}.part", part.index));
                let data = fs::read(&part_path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        StorageError::NoSuchUpload(format!(
                            "upload {upload} is missing part {}",
                            part.index
                        ))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                out.write_all(&data).await?;
            }
            out.sync_all().await?;
        }

        fs::rename(&temp_path, &path).await?;
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn abort_multipart(&self, _key: &str, upload: &UploadId) -> StorageResult<()> {
        let dir = self.upload_dir(upload);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NoSuchUpload(upload.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        fs::remove_file(&path).await.map_err(Self::map_missing(key))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_stat_roundtrip() {
        let (_dir, backend) = make_backend().await;
        backend
            .put("nested/object.bin", Bytes::from("hello world"))
            .await
            .unwrap();

        let meta = backend.stat("nested/object.bin").await.unwrap();
        assert_eq!(meta.size, 11);
        assert!(meta.etag.is_some());
        assert!(backend.exists("nested/object.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let (_dir, backend) = make_backend().await;
        match backend.stat("nope").await {
            Err(StorageError::NotFound(key)) => assert_eq!(key, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_range_clamps_at_eof() {
        let (_dir, backend) = make_backend().await;
        backend.put("obj", Bytes::from("0123456789")).await.unwrap();

        assert_eq!(
            backend.get_range("obj", 2, 4).await.unwrap(),
            Bytes::from("2345")
        );
        // Range past the tail short-reads.
        assert_eq!(
            backend.get_range("obj", 8, 10).await.unwrap(),
            Bytes::from("89")
        );
        // Offset at or beyond EOF yields empty, not an error.
        assert!(backend.get_range("obj", 10, 1).await.unwrap().is_empty());
        assert!(backend.get_range("obj", 99, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_and_upload_file() {
        let (_dir, backend) = make_backend().await;
        backend.put("src", Bytes::from("payload")).await.unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let local = scratch.path().join("sub/copy.bin");
        backend.download("src", &local).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");

        backend.upload(&local, "dst", Some("text/plain")).await.unwrap();
        assert_eq!(
            backend.get_range("dst", 0, 100).await.unwrap(),
            Bytes::from("payload")
        );
    }

    #[tokio::test]
    async fn test_multipart_assembles_in_order() {
        let (_dir, backend) = make_backend().await;
        let upload = backend.create_multipart("assembled").await.unwrap();

        let mut parts = Vec::new();
        for (i, chunk) in [&b"aaaa"[..], &b"bbbb"[..], &b"cc"[..]].iter().enumerate() {
            let tag = backend
                .put_part("assembled", &upload, (i + 1) as u32, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
            parts.push(tag);
        }

        // Object is invisible until completion.
        assert!(!backend.exists("assembled").await.unwrap());

        backend
            .complete_multipart("assembled", &upload, parts)
            .await
            .unwrap();
        assert_eq!(
            backend.get_range("assembled", 0, 100).await.unwrap(),
            Bytes::from("aaaabbbbcc")
        );

        // Staging directory is gone; the upload cannot be reused.
        assert!(matches!(
            backend
                .put_part("assembled", &upload, 4, Bytes::from("dd"))
                .await,
            Err(StorageError::NoSuchUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_discards_parts() {
        let (_dir, backend) = make_backend().await;
        let upload = backend.create_multipart("gone").await.unwrap();
        backend
            .put_part("gone", &upload, 1, Bytes::from("data"))
            .await
            .unwrap();

        backend.abort_multipart("gone", &upload).await.unwrap();
        assert!(!backend.exists("gone").await.unwrap());
        assert!(matches!(
            backend.abort_multipart("gone", &upload).await,
            Err(StorageError::NoSuchUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = make_backend().await;
        for key in ["../escape", "/absolute", "foo/../bar", ""] {
            assert!(
                matches!(backend.stat(key).await, Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, backend) = make_backend().await;
        backend.put("victim", Bytes::from("x")).await.unwrap();
        backend.delete("victim").await.unwrap();
        assert!(!backend.exists("victim").await.unwrap());
        assert!(matches!(
            backend.delete("victim").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
