//! Per-key object handle.

use crate::client::{Client, ObjectReader, ObjectWriter, OpenOptions};
use crate::error::Result;
use crate::text::{TextReader, TextWriter};
use bytes::Bytes;
use cirrus_core::config::CacheMode;

/// Convenience handle bound to one key.
///
/// In `PerObject` cache mode, dropping the handle evicts its cached file,
/// tying cache lifetime to the handle's lifetime. In every other mode drop
/// is a no-op. Eviction is skipped while a writer is open on the key.
pub struct RemoteObject {
    client: Client,
    key: String,
}

impl RemoteObject {
    pub(crate) fn new(client: Client, key: &str) -> Self {
        Self {
            client,
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn exists(&self) -> Result<bool> {
        self.client.exists(&self.key).await
    }

    pub async fn open_read(&self) -> Result<ObjectReader> {
        self.client.open_read(&self.key).await
    }

    pub async fn open_read_with(&self, opts: OpenOptions) -> Result<ObjectReader> {
        self.client.open_read_with(&self.key, opts).await
    }

    pub async fn open_write(&self) -> Result<ObjectWriter> {
        self.client.open_write(&self.key).await
    }

    pub async fn open_write_with(&self, opts: OpenOptions) -> Result<ObjectWriter> {
        self.client.open_write_with(&self.key, opts).await
    }

    pub async fn open_text_read(&self) -> Result<TextReader> {
        self.client.open_text_read(&self.key).await
    }

    pub async fn open_text_write(&self) -> Result<TextWriter> {
        self.client.open_text_write(&self.key).await
    }

    pub async fn read_bytes(&self) -> Result<Bytes> {
        self.client.read_bytes(&self.key).await
    }

    pub async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        self.client.write_bytes(&self.key, data).await
    }

    pub async fn read_to_string(&self) -> Result<String> {
        self.client.read_to_string(&self.key).await
    }

    pub async fn write_text(&self, text: &str) -> Result<()> {
        self.client.write_text(&self.key, text).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.client.delete(&self.key).await
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        if self.client.cache_mode() == CacheMode::PerObject {
            self.client.inner.cache.evict_blocking(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_core::config::ClientConfig;
    use cirrus_storage::{MemoryBackend, ObjectStore};
    use std::sync::Arc;

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
    async fn test_per_object_drop_evicts() {
        let (client, backend) = make_client(CacheMode::PerObject);
        backend.seed("k", "data").await;

        let object = client.object("k");
        let mut reader = object.open_read().await.unwrap();
        let cached = reader.local_path().unwrap().to_path_buf();
        assert_eq!(reader.read_to_end().await.unwrap(), b"data");
        reader.close().await.unwrap();
        assert!(cached.exists());

        drop(object);
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn test_temp_dir_drop_keeps_cache() {
        let (client, backend) = make_client(CacheMode::TempDir);
        backend.seed("k", "data").await;

        let object = client.object("k");
        let reader = object.open_read().await.unwrap();
        let cached = reader.local_path().unwrap().to_path_buf();
        reader.close().await.unwrap();

        drop(object);
        assert!(cached.exists());
    }

    #[tokio::test]
    async fn test_object_round_trip() {
        let (client, _) = make_client(CacheMode::TempDir);
        let object = client.object("nested/key.txt");
        object.write_bytes(b"abc").await.unwrap();
        assert!(object.exists().await.unwrap());
        assert_eq!(object.read_bytes().await.unwrap(), Bytes::from_static(b"abc"));

        object.delete().await.unwrap();
        assert!(!object.exists().await.unwrap());
    }
}
