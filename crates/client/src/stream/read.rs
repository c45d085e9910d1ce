//! Streaming reads with a range-fetch read-ahead window.

use crate::error::{Error, Result};
use bytes::Bytes;
use cirrus_storage::ObjectStore;
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::debug;

/// Random-access reader that fetches byte ranges on demand.
///
/// Sequential reads are served from the read-ahead window until it is
/// exhausted; a read outside the window issues exactly one `get_range` of at
/// least the requested size, up to the configured buffer. Seeks are O(1):
/// they move the logical position and nothing else.
pub struct StreamingReader {
    backend: Arc<dyn ObjectStore>,
    key: String,
    size: u64,
    pos: u64,
    buffer: Bytes,
    buffer_start: u64,
    buffer_size: usize,
    closed: bool,
}

impl StreamingReader {
    /// Open a reader. Stats the object once, so a missing key fails here.
    pub(crate) async fn open(
        backend: Arc<dyn ObjectStore>,
        key: &str,
        buffer_size: usize,
    ) -> Result<Self> {
        let meta = backend.stat(key).await?;
        Ok(Self {
            backend,
            key: key.to_string(),
            size: meta.size,
            pos: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
            buffer_size,
            closed: false,
        })
    }

    /// Total object size as reported at open time.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Unsupported("stream is closed".to_string()));
        }
        Ok(())
    }

    /// Bytes of the current window available at the logical position.
    fn buffered(&self) -> usize {
        let end = self.buffer_start + self.buffer.len() as u64;
        if self.pos >= self.buffer_start && self.pos < end {
            (end - self.pos) as usize
        } else {
            0
        }
    }

    /// Read up to `n` bytes. An empty result means EOF.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_open()?;
        if n == 0 || self.pos >= self.size {
            return Ok(Bytes::new());
        }

        if self.buffered() == 0 {
            let want = n.max(self.buffer_size) as u64;
            let length = want.min(self.size - self.pos);
            debug!(
                key = %self.key,
                offset = self.pos,
                length,
                "read-ahead range fetch"
            );
            let window = self.backend.get_range(&self.key, self.pos, length).await?;
            if window.is_empty() {
                // Object shrank under us; treat as EOF.
                self.size = self.pos;
                return Ok(Bytes::new());
            }
            self.buffer_start = self.pos;
            self.buffer = window;
        }

        let offset = (self.pos - self.buffer_start) as usize;
        let take = n.min(self.buffer.len() - offset);
        let out = self.buffer.slice(offset..offset + take);
        self.pos += take as u64;
        Ok(out)
    }

    /// Read into a caller-supplied buffer, returning the byte count.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let chunk = self.read(buf.len()).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Read from the current position through EOF.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(self.buffer_size).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Move the logical position. No network call happens until the next
    /// read, and only if the new position falls outside the current window.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset)
                .map_err(|_| Error::Unsupported("seek offset overflow".to_string()))?,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if target < 0 {
            return Err(Error::Unsupported("negative seek position".to_string()));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Abandon the window. No remote-side cleanup is needed.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.buffer = Bytes::new();
        Ok(())
    }
}

impl fmt::Debug for StreamingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingReader")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_storage::MemoryBackend;

    async fn make_reader(
        contents: &str,
        buffer_size: usize,
    ) -> (Arc<MemoryBackend>, StreamingReader) {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("obj", contents.to_string()).await;
        let reader = StreamingReader::open(backend.clone() as Arc<dyn ObjectStore>, "obj", buffer_size)
            .await
            .unwrap();
        (backend, reader)
    }

    #[tokio::test]
    async fn test_missing_object_fails_at_open() {
        let backend = Arc::new(MemoryBackend::new());
        let result =
            StreamingReader::open(backend as Arc<dyn ObjectStore>, "ghost", 64).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sequential_reads_share_one_fetch() {
        let (backend, mut reader) = make_reader("abcdefghij", 8).await;

        assert_eq!(reader.read(3).await.unwrap(), Bytes::from("abc"));
        assert_eq!(reader.read(3).await.unwrap(), Bytes::from("def"));
        assert_eq!(reader.read(2).await.unwrap(), Bytes::from("gh"));
        // Three reads inside one 8-byte window: exactly one range call.
        assert_eq!(backend.op_counts().get_range, 1);

        assert_eq!(reader.read(10).await.unwrap(), Bytes::from("ij"));
        assert_eq!(backend.op_counts().get_range, 2);
    }

    #[tokio::test]
    async fn test_eof_returns_empty() {
        let (_backend, mut reader) = make_reader("xyz", 64).await;
        assert_eq!(reader.read(10).await.unwrap(), Bytes::from("xyz"));
        assert!(reader.read(10).await.unwrap().is_empty());
        assert!(reader.read(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seek_is_lazy() {
        let (backend, mut reader) = make_reader("0123456789", 4).await;
        reader.seek(SeekFrom::Start(6)).await.unwrap();
        reader.seek(SeekFrom::Current(-2)).await.unwrap();
        reader.seek(SeekFrom::End(-5)).await.unwrap();
        assert_eq!(reader.tell(), 5);
        // Only position bookkeeping so far.
        assert_eq!(backend.op_counts().get_range, 0);

        assert_eq!(reader.read(3).await.unwrap(), Bytes::from("567"));
        assert_eq!(backend.op_counts().get_range, 1);
    }

    #[tokio::test]
    async fn test_seek_within_window_reuses_buffer() {
        let (backend, mut reader) = make_reader("0123456789", 10).await;
        reader.read(4).await.unwrap();
        reader.seek(SeekFrom::Start(1)).await.unwrap();
        assert_eq!(reader.read(3).await.unwrap(), Bytes::from("123"));
        assert_eq!(backend.op_counts().get_range, 1);
    }

    #[tokio::test]
    async fn test_negative_seek_rejected() {
        let (_backend, mut reader) = make_reader("abc", 64).await;
        assert!(reader
            .seek(SeekFrom::Current(-1))
            .await
            .unwrap_err()
            .is_unsupported());
    }

    #[tokio::test]
    async fn test_read_matches_whole_object_for_any_buffer_size() {
        let contents: String = (0..997).map(|i| ((i % 26) as u8 + b'a') as char).collect();
        for buffer_size in [1, 7, 64, 1024] {
            let (_backend, mut reader) = make_reader(&contents, buffer_size).await;
            let mut out = Vec::new();
            loop {
                let chunk = reader.read(13).await.unwrap();
                if chunk.is_empty() {
                    break;
                }
                out.extend_from_slice(&chunk);
            }
            assert_eq!(out, contents.as_bytes(), "buffer_size {buffer_size}");
        }
    }

    #[tokio::test]
    async fn test_read_into() {
        let (_backend, mut reader) = make_reader("hello world", 4).await;
        let mut buf = [0u8; 5];
        let n = reader.read_into(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
