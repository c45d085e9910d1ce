//! Streaming writes with write-behind buffering and multipart uploads.

use crate::error::{Error, Result};
use bytes::BytesMut;
use cirrus_core::upload::{PartTag, UploadId, UploadPhase};
use cirrus_storage::{ObjectStore, StorageError};
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::{debug, warn};

/// Append-only writer that uploads the object in parts.
///
/// Data accumulates in memory until one part size is reached, then ships as
/// a `put_part` in strict index order. If the total payload never reaches a
/// single part, `close()` performs one whole-object put instead of touching
/// the multipart machinery. Nothing is visible remotely until close
/// completes the upload.
pub struct StreamingWriter {
    backend: Arc<dyn ObjectStore>,
    key: String,
    part_size: usize,
    buffer: BytesMut,
    pos: u64,
    phase: UploadPhase,
    upload: Option<UploadId>,
    parts: Vec<PartTag>,
    next_index: u32,
}

impl StreamingWriter {
    pub(crate) fn new(backend: Arc<dyn ObjectStore>, key: &str, part_size: usize) -> Self {
        Self {
            backend,
            key: key.to_string(),
            part_size,
            buffer: BytesMut::new(),
            pos: 0,
            phase: UploadPhase::NotStarted,
            upload: None,
            parts: Vec::new(),
            next_index: 1,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.phase.is_active() {
            return Err(Error::Unsupported(format!(
                "write stream for {} is no longer active",
                self.key
            )));
        }
        Ok(())
    }

    /// Record a transfer failure and hand the error back to the caller.
    fn fail(&mut self, err: StorageError) -> Error {
        self.phase = UploadPhase::Failed;
        err.into()
    }

    /// Append bytes to the stream; full parts are shipped immediately.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_active()?;
        self.buffer.extend_from_slice(data);
        self.pos += data.len() as u64;
        while self.buffer.len() >= self.part_size {
            self.ship_part().await?;
        }
        Ok(data.len())
    }

    async fn ship_part(&mut self) -> Result<()> {
        if self.phase == UploadPhase::NotStarted {
            let upload = match self.backend.create_multipart(&self.key).await {
                Ok(upload) => upload,
                Err(e) => return Err(self.fail(e)),
            };
            debug!(key = %self.key, %upload, "multipart upload started");
            self.upload = Some(upload);
            self.phase = self.phase.advance(UploadPhase::InProgress)?;
        }

        let chunk = self.buffer.split_to(self.part_size).freeze();
        let upload = self.upload.as_ref().ok_or_else(|| {
            Error::Io(std::io::Error::other("multipart session missing upload id"))
        })?;
        match self
            .backend
            .put_part(&self.key, upload, self.next_index, chunk)
            .await
        {
            Ok(tag) => {
                self.parts.push(tag);
                self.next_index += 1;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Ship any complete buffered parts.
    ///
    /// Sub-part remainders stay buffered until close: most stores reject
    /// non-final parts below their minimum part size.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_active()?;
        while self.buffer.len() >= self.part_size {
            self.ship_part().await?;
        }
        Ok(())
    }

    /// Writes are append-only: only a no-op seek to the current position is
    /// accepted; any repositioning fails before the upload can be corrupted.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_active()?;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.pos as i64 + delta,
        };
        if target == self.pos as i64 {
            return Ok(self.pos);
        }
        if target < self.pos as i64 {
            Err(Error::Unsupported(
                "backward seek on a write stream".to_string(),
            ))
        } else {
            Err(Error::Unsupported(
                "forward seek on a write stream".to_string(),
            ))
        }
    }

    /// Total bytes accepted so far.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Number of parts shipped so far.
    pub fn parts_uploaded(&self) -> usize {
        self.parts.len()
    }

    /// Commit the object: remainder part (or whole-object put) followed by
    /// exactly one completion attempt.
    pub async fn close(mut self) -> Result<()> {
        match self.phase {
            UploadPhase::Completed | UploadPhase::Aborted => return Ok(()),
            UploadPhase::Failed => {
                return Err(self.incomplete(StorageError::Config(
                    "close after failed transfer".to_string(),
                )));
            }
            UploadPhase::NotStarted => {
                // Everything fit below one part: a single atomic put.
                let data = self.buffer.split().freeze();
                self.backend.put(&self.key, data).await?;
                self.phase = self.phase.advance(UploadPhase::Completed)?;
                debug!(key = %self.key, bytes = self.pos, "whole-object put on close");
                return Ok(());
            }
            UploadPhase::InProgress => {}
        }

        if !self.buffer.is_empty() {
            // Final part may be any size.
            let chunk = self.buffer.split().freeze();
            let upload = self.upload.as_ref().ok_or_else(|| {
                Error::Io(std::io::Error::other("multipart session missing upload id"))
            })?;
            match self
                .backend
                .put_part(&self.key, upload, self.next_index, chunk)
                .await
            {
                Ok(tag) => {
                    self.parts.push(tag);
                    self.next_index += 1;
                }
                Err(e) => {
                    self.phase = UploadPhase::Failed;
                    return Err(self.incomplete(e));
                }
            }
        }

        let upload = self.upload.clone().ok_or_else(|| {
            Error::Io(std::io::Error::other("multipart session missing upload id"))
        })?;
        let parts = std::mem::take(&mut self.parts);
        match self
            .backend
            .complete_multipart(&self.key, &upload, parts)
            .await
        {
            Ok(()) => {
                self.phase = self.phase.advance(UploadPhase::Completed)?;
                debug!(key = %self.key, bytes = self.pos, "multipart upload completed");
                Ok(())
            }
            Err(e) => {
                // Leave the upload abandoned for out-of-band cleanup; retry
                // semantics belong to the backend.
                self.phase = UploadPhase::Failed;
                warn!(key = %self.key, %upload, error = %e, "multipart completion failed");
                Err(self.incomplete(e))
            }
        }
    }

    /// Explicitly abandon the upload and discard staged parts.
    pub async fn abort(mut self) -> Result<()> {
        match self.phase {
            UploadPhase::NotStarted => {
                self.phase = self.phase.advance(UploadPhase::Aborted)?;
                Ok(())
            }
            UploadPhase::InProgress => {
                if let Some(upload) = self.upload.clone() {
                    self.backend.abort_multipart(&self.key, &upload).await?;
                }
                self.phase = self.phase.advance(UploadPhase::Aborted)?;
                Ok(())
            }
            _ => Err(Error::Unsupported(format!(
                "abort on a finished write stream for {}",
                self.key
            ))),
        }
    }

    fn incomplete(&self, source: StorageError) -> Error {
        match &self.upload {
            Some(upload) => Error::IncompleteUpload {
                key: self.key.clone(),
                upload_id: upload.clone(),
                source: Box::new(source),
            },
            None => source.into(),
        }
    }
}

impl fmt::Debug for StreamingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingWriter")
            .field("key", &self.key)
            .field("pos", &self.pos)
            .field("phase", &self.phase)
            .field("parts", &self.parts.len())
            .finish_non_exhaustive()
    }
}
