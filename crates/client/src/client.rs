//! Client facade: cache-mode dispatch over one storage backend.

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::materialized::{MaterializedFile, MaterializedWriter};
use crate::object::RemoteObject;
use crate::stream::{StreamingReader, StreamingWriter};
use crate::text::{TextReader, TextSink, TextSource, TextWriter};
use bytes::Bytes;
use cirrus_core::config::{CacheMode, ClientConfig, Newline};
use cirrus_storage::ObjectStore;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// Per-open overrides.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenOptions {
    /// Re-download even when the cached copy is fresh.
    pub force_refresh: bool,
    /// Upload on close even when the local file did not change.
    pub force_upload: bool,
}

impl OpenOptions {
    pub fn force_refresh(mut self, yes: bool) -> Self {
        self.force_refresh = yes;
        self
    }

    pub fn force_upload(mut self, yes: bool) -> Self {
        self.force_upload = yes;
        self
    }
}

pub(crate) struct ClientInner {
    backend: Arc<dyn ObjectStore>,
    pub(crate) cache: Arc<CacheStore>,
    mode: RwLock<CacheMode>,
    buffer_size: usize,
    part_size: usize,
    newline: Newline,
    // True when the cache root is a TempDir owned by the client.
    ephemeral_root: bool,
    _tmp_dir: Option<tempfile::TempDir>,
}

/// Handle to a storage backend with a local materialization cache.
///
/// Cloning is cheap and every clone shares the same cache, writer locks,
/// and cache mode. The mode is read once per `open_*` call, so changing it
/// never affects handles already open.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(backend: Arc<dyn ObjectStore>, config: ClientConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let (root, tmp_dir) = match &config.cache_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                (root.clone(), None)
            }
            None => {
                let tmp = tempfile::TempDir::new()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        debug!(
            backend = backend.backend_name(),
            mode = %config.cache_mode,
            root = %root.display(),
            "client created"
        );

        let cache = Arc::new(CacheStore::new(
            root,
            backend.clone(),
            config.content_type.clone(),
        ));
        Ok(Self {
            inner: Arc::new(ClientInner {
                backend,
                cache,
                mode: RwLock::new(config.cache_mode),
                buffer_size: config.buffer_size,
                part_size: config.part_size,
                newline: config.newline,
                ephemeral_root: tmp_dir.is_some(),
                _tmp_dir: tmp_dir,
            }),
        })
    }

    /// The cache mode new handles will be opened with.
    pub fn cache_mode(&self) -> CacheMode {
        *self.inner.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the cache mode for handles opened from now on.
    ///
    /// Switching to `Persistent` requires a caller-supplied cache root;
    /// a client whose root is an ephemeral temp directory rejects it.
    pub fn set_cache_mode(&self, mode: CacheMode) -> Result<()> {
        if mode == CacheMode::Persistent && self.inner.ephemeral_root {
            return Err(Error::Config(
                "persistent cache mode requires cache_root".to_string(),
            ));
        }
        *self.inner.mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
        Ok(())
    }

    pub async fn open_read(&self, key: &str) -> Result<ObjectReader> {
        self.open_read_with(key, OpenOptions::default()).await
    }

    #[instrument(skip(self), fields(mode = %self.cache_mode()))]
    pub async fn open_read_with(&self, key: &str, opts: OpenOptions) -> Result<ObjectReader> {
        let mode = self.cache_mode();
        match mode {
            CacheMode::Streaming => Ok(ObjectReader::Streaming(
                StreamingReader::open(self.inner.backend.clone(), key, self.inner.buffer_size)
                    .await?,
            )),
            _ => Ok(ObjectReader::Materialized(
                MaterializedFile::open(
                    self.inner.cache.clone(),
                    key,
                    opts.force_refresh,
                    mode == CacheMode::CloseFile,
                )
                .await?,
            )),
        }
    }

    pub async fn open_write(&self, key: &str) -> Result<ObjectWriter> {
        self.open_write_with(key, OpenOptions::default()).await
    }

    #[instrument(skip(self), fields(mode = %self.cache_mode()))]
    pub async fn open_write_with(&self, key: &str, opts: OpenOptions) -> Result<ObjectWriter> {
        let mode = self.cache_mode();
        match mode {
            CacheMode::Streaming => Ok(ObjectWriter::Streaming(StreamingWriter::new(
                self.inner.backend.clone(),
                key,
                self.inner.part_size,
            ))),
            _ => Ok(ObjectWriter::Materialized(
                MaterializedWriter::create(
                    self.inner.cache.clone(),
                    key,
                    opts.force_upload,
                    mode == CacheMode::CloseFile,
                )
                .await?,
            )),
        }
    }

    pub async fn open_text_read(&self, key: &str) -> Result<TextReader> {
        self.open_text_read_with(key, OpenOptions::default()).await
    }

    pub async fn open_text_read_with(&self, key: &str, opts: OpenOptions) -> Result<TextReader> {
        let source = match self.open_read_with(key, opts).await? {
            ObjectReader::Materialized(file) => TextSource::Materialized(file),
            ObjectReader::Streaming(reader) => TextSource::Streaming(reader),
        };
        Ok(TextReader::new(source, self.inner.buffer_size))
    }

    pub async fn open_text_write(&self, key: &str) -> Result<TextWriter> {
        self.open_text_write_with(key, OpenOptions::default()).await
    }

    pub async fn open_text_write_with(&self, key: &str, opts: OpenOptions) -> Result<TextWriter> {
        let sink = match self.open_write_with(key, opts).await? {
            ObjectWriter::Materialized(writer) => TextSink::Materialized(writer),
            ObjectWriter::Streaming(writer) => TextSink::Streaming(writer),
        };
        Ok(TextWriter::new(sink, self.inner.newline))
    }

    /// Read a whole object.
    pub async fn read_bytes(&self, key: &str) -> Result<Bytes> {
        let mut reader = self.open_read(key).await?;
        let data = reader.read_to_end().await?;
        reader.close().await?;
        Ok(Bytes::from(data))
    }

    /// Write a whole object in one call.
    pub async fn write_bytes(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut writer = self.open_write(key).await?;
        writer.write(data).await?;
        writer.close().await
    }

    /// Read a whole object as UTF-8 text.
    pub async fn read_to_string(&self, key: &str) -> Result<String> {
        let mut reader = self.open_text_read(key).await?;
        let text = reader.read_to_string().await?;
        reader.close().await?;
        Ok(text)
    }

    /// Write a string, translating newlines per the configured convention.
    pub async fn write_text(&self, key: &str, text: &str) -> Result<()> {
        let mut writer = self.open_text_write(key).await?;
        writer.write_str(text).await?;
        writer.close().await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.inner.backend.exists(key).await?)
    }

    /// Delete the remote object and evict any cached copy.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.backend.delete(key).await?;
        self.inner.cache.evict(key).await
    }

    /// Remove every cached file and all freshness bookkeeping.
    pub async fn reset_cache(&self) -> Result<()> {
        self.inner.cache.reset_all().await
    }

    /// Path of the cached copy of `key`, if one is materialized on disk.
    pub fn cached_path(&self, key: &str) -> Option<PathBuf> {
        self.inner.cache.get_cached_path(key)
    }

    /// Per-key handle; in `PerObject` mode its drop evicts the key.
    pub fn object(&self, key: &str) -> RemoteObject {
        RemoteObject::new(self.clone(), key)
    }
}

/// Read handle, dispatched on the cache mode at open time.
#[derive(Debug)]
pub enum ObjectReader {
    Materialized(MaterializedFile),
    Streaming(StreamingReader),
}

impl ObjectReader {
    /// Read up to `n` bytes; a shorter result means EOF.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        match self {
            Self::Materialized(file) => file.read(n).await,
            Self::Streaming(reader) => reader.read(n).await,
        }
    }

    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Materialized(file) => file.read_into(buf).await,
            Self::Streaming(reader) => reader.read_into(buf).await,
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        match self {
            Self::Materialized(file) => file.read_to_end().await,
            Self::Streaming(reader) => reader.read_to_end().await,
        }
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            Self::Materialized(file) => file.seek(pos).await,
            Self::Streaming(reader) => reader.seek(pos).await,
        }
    }

    pub async fn tell(&mut self) -> Result<u64> {
        match self {
            Self::Materialized(file) => file.tell().await,
            Self::Streaming(reader) => Ok(reader.tell()),
        }
    }

    /// Path of the backing cache file; streaming handles have none.
    pub fn local_path(&self) -> Result<&Path> {
        match self {
            Self::Materialized(file) => Ok(file.local_path()),
            Self::Streaming(_) => Err(Error::Unsupported(
                "no local filesystem path for a streaming handle".to_string(),
            )),
        }
    }

    pub async fn close(self) -> Result<()> {
        match self {
            Self::Materialized(file) => file.close().await,
            Self::Streaming(reader) => reader.close().await,
        }
    }
}

/// Write handle, dispatched on the cache mode at open time.
#[derive(Debug)]
pub enum ObjectWriter {
    Materialized(MaterializedWriter),
    Streaming(StreamingWriter),
}

impl ObjectWriter {
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            Self::Materialized(writer) => writer.write(data).await,
            Self::Streaming(writer) => writer.write(data).await,
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Materialized(writer) => writer.flush().await,
            Self::Streaming(writer) => writer.flush().await,
        }
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            Self::Materialized(writer) => writer.seek(pos).await,
            Self::Streaming(writer) => writer.seek(pos).await,
        }
    }

    pub fn local_path(&self) -> Result<&Path> {
        match self {
            Self::Materialized(writer) => Ok(writer.local_path()),
            Self::Streaming(_) => Err(Error::Unsupported(
                "no local filesystem path for a streaming handle".to_string(),
            )),
        }
    }

    /// Finish the write: upload (materialized) or finalize parts (streaming).
    pub async fn close(self) -> Result<()> {
        match self {
            Self::Materialized(writer) => writer.close().await,
            Self::Streaming(writer) => writer.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_storage::MemoryBackend;

    fn make_client(mode: CacheMode) -> (Client, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let config = ClientConfig {
            cache_mode: mode,
            ..ClientConfig::default()
        };
        let client = Client::new(backend.clone() as Arc<dyn ObjectStore>, config).unwrap();
        (client, backend)
    }

    #[tokio::test]
    async fn test_round_trip_via_cache() {
        let (client, backend) = make_client(CacheMode::TempDir);
        client.write_bytes("a/b.bin", b"payload").await.unwrap();
        assert_eq!(backend.op_counts().upload, 1);

        let data = client.read_bytes("a/b.bin").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_streaming_mode_never_touches_disk() {
        let (client, backend) = make_client(CacheMode::Streaming);
        client.write_bytes("k", b"small").await.unwrap();
        // Below part size: a single whole-object put, no cache traffic.
        assert_eq!(backend.op_counts().put, 1);
        assert_eq!(backend.op_counts().upload, 0);
        assert_eq!(backend.op_counts().download, 0);

        let reader = client.open_read("k").await.unwrap();
        assert!(reader.local_path().unwrap_err().is_unsupported());
        assert_eq!(backend.op_counts().download, 0);
    }

    #[tokio::test]
    async fn test_mode_change_applies_to_new_handles_only() {
        let (client, backend) = make_client(CacheMode::TempDir);
        backend.seed("k", "data").await;

        let mut materialized = client.open_read("k").await.unwrap();
        client.set_cache_mode(CacheMode::Streaming).unwrap();

        // Already-open handle keeps its materialized file.
        assert!(materialized.local_path().is_ok());
        assert_eq!(materialized.read_to_end().await.unwrap(), b"data");

        let streaming = client.open_read("k").await.unwrap();
        assert!(streaming.local_path().is_err());
    }

    #[tokio::test]
    async fn test_persistent_mode_requires_root() {
        let (client, _) = make_client(CacheMode::TempDir);
        assert!(client.set_cache_mode(CacheMode::Persistent).is_err());

        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            cache_mode: CacheMode::TempDir,
            cache_root: Some(dir.path().join("cache")),
            ..ClientConfig::default()
        };
        let client = Client::new(backend as Arc<dyn ObjectStore>, config).unwrap();
        client.set_cache_mode(CacheMode::Persistent).unwrap();
    }

    #[tokio::test]
    async fn test_close_file_mode_evicts_after_read() {
        let (client, backend) = make_client(CacheMode::CloseFile);
        backend.seed("k", "data").await;

        let mut reader = client.open_read("k").await.unwrap();
        let cached = reader.local_path().unwrap().to_path_buf();
        assert_eq!(reader.read_to_end().await.unwrap(), b"data");
        assert!(cached.exists());

        reader.close().await.unwrap();
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn test_delete_evicts_cache() {
        let (client, backend) = make_client(CacheMode::TempDir);
        backend.seed("k", "data").await;

        let reader = client.open_read("k").await.unwrap();
        let cached = reader.local_path().unwrap().to_path_buf();
        reader.close().await.unwrap();
        assert!(cached.exists());

        client.delete("k").await.unwrap();
        assert!(!cached.exists());
        assert!(!client.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_cached_path_reflects_materialization() {
        let (client, backend) = make_client(CacheMode::TempDir);
        backend.seed("dir/obj", "payload").await;

        assert!(client.cached_path("dir/obj").is_none());
        client.read_bytes("dir/obj").await.unwrap();
        let path = client.cached_path("dir/obj").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");

        client.reset_cache().await.unwrap();
        assert!(client.cached_path("dir/obj").is_none());
    }

    #[tokio::test]
    async fn test_handles_are_debug_printable() {
        let (client, backend) = make_client(CacheMode::Streaming);
        backend.seed("k", "data").await;

        let reader = client.open_read("k").await.unwrap();
        assert!(format!("{reader:?}").contains("Streaming"));
        let writer = client.open_write("k").await.unwrap();
        assert!(format!("{writer:?}").contains("\"k\""));
    }

    #[tokio::test]
    async fn test_text_round_trip_with_crlf() {
        let backend = Arc::new(MemoryBackend::new());
        let config = ClientConfig {
            cache_mode: CacheMode::Streaming,
            newline: Newline::CrLf,
            ..ClientConfig::default()
        };
        let client = Client::new(backend.clone() as Arc<dyn ObjectStore>, config).unwrap();

        client.write_text("log.txt", "one\ntwo\n").await.unwrap();
        assert_eq!(
            backend.contents("log.txt").await.unwrap(),
            Bytes::from_static(b"one\r\ntwo\r\n")
        );

        // Reads accept both conventions.
        let mut reader = client.open_text_read("log.txt").await.unwrap();
        assert_eq!(reader.read_lines(None).await.unwrap(), vec!["one", "two"]);
    }
}
