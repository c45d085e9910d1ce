//! Contract tests exercised against both reference backends.

use bytes::Bytes;
use cirrus_storage::{FilesystemBackend, MemoryBackend, ObjectStore, StorageError};
use std::sync::Arc;

async fn backends() -> Vec<(&'static str, Arc<dyn ObjectStore>, tempfile::TempDir)> {
    let dir_fs = tempfile::tempdir().unwrap();
    let dir_mem = tempfile::tempdir().unwrap();
    let fs = FilesystemBackend::new(dir_fs.path()).await.unwrap();
    vec![
        ("filesystem", Arc::new(fs) as Arc<dyn ObjectStore>, dir_fs),
        (
            "memory",
            Arc::new(MemoryBackend::new()) as Arc<dyn ObjectStore>,
            dir_mem,
        ),
    ]
}

#[tokio::test]
async fn put_then_stat_reports_size_and_etag() {
    for (name, backend, _dir) in backends().await {
        backend
            .put("a/b/c.bin", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let meta = backend.stat("a/b/c.bin").await.unwrap();
        assert_eq!(meta.size, 10, "{name}");
        assert!(meta.etag.is_some(), "{name}");
        assert!(meta.last_modified.is_some(), "{name}");
    }
}

#[tokio::test]
async fn stat_missing_key_is_not_found() {
    for (name, backend, _dir) in backends().await {
        let err = backend.stat("missing").await.unwrap_err();
        assert!(err.is_not_found(), "{name}: {err}");
        assert!(!backend.exists("missing").await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn etag_changes_when_object_is_rewritten() {
    for (name, backend, _dir) in backends().await {
        backend.put("k", Bytes::from_static(b"one")).await.unwrap();
        let first = backend.stat("k").await.unwrap().etag;

        // Different length guarantees a new marker on both backends.
        backend
            .put("k", Bytes::from_static(b"other"))
            .await
            .unwrap();
        let second = backend.stat("k").await.unwrap().etag;
        assert_ne!(first, second, "{name}");
    }
}

#[tokio::test]
async fn get_range_clamps_at_eof() {
    for (name, backend, _dir) in backends().await {
        backend
            .put("k", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        assert_eq!(
            backend.get_range("k", 2, 4).await.unwrap(),
            Bytes::from_static(b"2345"),
            "{name}"
        );
        // Range past EOF comes back short, not as an error.
        assert_eq!(
            backend.get_range("k", 8, 100).await.unwrap(),
            Bytes::from_static(b"89"),
            "{name}"
        );
        assert!(backend.get_range("k", 10, 1).await.unwrap().is_empty(), "{name}");
        assert!(backend.get_range("k", 99, 1).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn download_and_upload_round_trip() {
    for (name, backend, dir) in backends().await {
        backend
            .put("remote.bin", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let local = dir.path().join("downloaded.bin");
        backend.download("remote.bin", &local).await.unwrap();
        assert_eq!(tokio::fs::read(&local).await.unwrap(), b"payload", "{name}");

        backend
            .upload(&local, "copy.bin", Some("application/octet-stream"))
            .await
            .unwrap();
        assert_eq!(
            backend.get_range("copy.bin", 0, 100).await.unwrap(),
            Bytes::from_static(b"payload"),
            "{name}"
        );
    }
}

#[tokio::test]
async fn delete_removes_object() {
    for (name, backend, _dir) in backends().await {
        backend.put("k", Bytes::from_static(b"x")).await.unwrap();
        backend.delete("k").await.unwrap();
        assert!(!backend.exists("k").await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn multipart_assembles_parts_in_tag_order() {
    for (name, backend, _dir) in backends().await {
        let upload = backend.create_multipart("big.bin").await.unwrap();
        let mut tags = Vec::new();
        for (i, chunk) in [&b"aaaa"[..], b"bbbb", b"cc"].iter().enumerate() {
            let tag = backend
                .put_part("big.bin", &upload, (i + 1) as u32, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
            tags.push(tag);
        }
        backend
            .complete_multipart("big.bin", &upload, tags)
            .await
            .unwrap();

        assert_eq!(
            backend.get_range("big.bin", 0, 100).await.unwrap(),
            Bytes::from_static(b"aaaabbbbcc"),
            "{name}"
        );
        // The upload id is spent once completed.
        let err = backend
            .complete_multipart("big.bin", &upload, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchUpload(_)), "{name}: {err}");
    }
}

#[tokio::test]
async fn aborted_multipart_leaves_no_object() {
    for (name, backend, _dir) in backends().await {
        let upload = backend.create_multipart("gone.bin").await.unwrap();
        backend
            .put_part("gone.bin", &upload, 1, Bytes::from_static(b"data"))
            .await
            .unwrap();
        backend.abort_multipart("gone.bin", &upload).await.unwrap();

        assert!(!backend.exists("gone.bin").await.unwrap(), "{name}");
        let err = backend
            .put_part("gone.bin", &upload, 2, Bytes::from_static(b"more"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchUpload(_)), "{name}: {err}");
    }
}

#[tokio::test]
async fn unsafe_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FilesystemBackend::new(dir.path()).await.unwrap();

    for key in ["", "../escape", "/absolute", "a/../../b"] {
        let err = backend.stat(key).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)), "key {key:?}: {err}");
    }
}
