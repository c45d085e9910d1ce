//! Text-mode wrappers: UTF-8 decoding, newline translation, line iteration.

use crate::error::{Error, Result};
use crate::materialized::{MaterializedFile, MaterializedWriter};
use crate::stream::{StreamingReader, StreamingWriter};
use bytes::Bytes;
use cirrus_core::config::Newline;
use std::path::Path;

pub(crate) enum TextSource {
    Materialized(MaterializedFile),
    Streaming(StreamingReader),
}

impl TextSource {
    async fn fill(&mut self, n: usize) -> Result<Bytes> {
        match self {
            Self::Materialized(file) => file.read(n).await,
            Self::Streaming(reader) => reader.read(n).await,
        }
    }
}

/// Line-oriented reader over a text object.
///
/// Lines are yielded without their terminator; `\r\n` and `\n` are both
/// accepted on input. More ranges are fetched only when no terminator is
/// present in the buffered window, so the number of network calls for a
/// streamed file is bounded by size/buffer, not by line count.
pub struct TextReader {
    source: TextSource,
    chunk_size: usize,
    pending: Vec<u8>,
    eof: bool,
}

impl TextReader {
    pub(crate) fn new(source: TextSource, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size,
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Next line, or `None` at EOF.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.next_line_counted().await?.map(|(line, _)| line))
    }

    /// Next line plus the raw byte count it consumed, terminator included.
    async fn next_line_counted(&mut self) -> Result<Option<(String, usize)>> {
        loop {
            if let Some(i) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=i).collect();
                let raw = line.len();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return decode(line).map(|line| Some((line, raw)));
            }

            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.pending);
                let raw = line.len();
                return decode(line).map(|line| Some((line, raw)));
            }

            let chunk = self.source.fill(self.chunk_size).await?;
            if chunk.is_empty() {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&chunk);
            }
        }
    }

    /// Collect lines until EOF, or until the accumulated raw byte count
    /// exceeds `hint` when one is given.
    pub async fn read_lines(&mut self, hint: Option<usize>) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut consumed = 0usize;
        while let Some((line, raw)) = self.next_line_counted().await? {
            consumed += raw;
            lines.push(line);
            if let Some(hint) = hint {
                if consumed > hint {
                    break;
                }
            }
        }
        Ok(lines)
    }

    /// Read the remainder of the object as one string.
    pub async fn read_to_string(&mut self) -> Result<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        while !self.eof {
            let chunk = self.source.fill(self.chunk_size).await?;
            if chunk.is_empty() {
                self.eof = true;
            } else {
                bytes.extend_from_slice(&chunk);
            }
        }
        decode(bytes)
    }

    /// Path of the backing cache file; text streams have none.
    pub fn local_path(&self) -> Result<&Path> {
        match &self.source {
            TextSource::Materialized(file) => Ok(file.local_path()),
            TextSource::Streaming(_) => Err(Error::Unsupported(
                "no local filesystem path for a streaming handle".to_string(),
            )),
        }
    }

    pub async fn close(self) -> Result<()> {
        match self.source {
            TextSource::Materialized(file) => file.close().await,
            TextSource::Streaming(reader) => reader.close().await,
        }
    }
}

fn decode(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))
}

pub(crate) enum TextSink {
    Materialized(MaterializedWriter),
    Streaming(StreamingWriter),
}

/// Text writer with newline translation.
pub struct TextWriter {
    sink: TextSink,
    newline: Newline,
}

impl TextWriter {
    pub(crate) fn new(sink: TextSink, newline: Newline) -> Self {
        Self { sink, newline }
    }

    /// Write a string, translating `\n` to the configured newline.
    /// Returns the number of bytes written after translation.
    pub async fn write_str(&mut self, s: &str) -> Result<usize> {
        let bytes: Vec<u8> = match self.newline {
            Newline::Lf => s.as_bytes().to_vec(),
            Newline::CrLf => {
                let mut out = Vec::with_capacity(s.len());
                for b in s.bytes() {
                    if b == b'\n' {
                        out.extend_from_slice(b"\r\n");
                    } else {
                        out.push(b);
                    }
                }
                out
            }
        };
        match &mut self.sink {
            TextSink::Materialized(writer) => writer.write(&bytes).await,
            TextSink::Streaming(writer) => writer.write(&bytes).await,
        }
    }

    /// Write a string followed by one newline.
    pub async fn write_line(&mut self, s: &str) -> Result<usize> {
        let written = self.write_str(s).await?;
        let newline = match &mut self.sink {
            TextSink::Materialized(writer) => writer.write(self.newline.as_bytes()).await?,
            TextSink::Streaming(writer) => writer.write(self.newline.as_bytes()).await?,
        };
        Ok(written + newline)
    }

    pub async fn flush(&mut self) -> Result<()> {
        match &mut self.sink {
            TextSink::Materialized(writer) => writer.flush().await,
            TextSink::Streaming(writer) => writer.flush().await,
        }
    }

    pub fn local_path(&self) -> Result<&Path> {
        match &self.sink {
            TextSink::Materialized(writer) => Ok(writer.local_path()),
            TextSink::Streaming(_) => Err(Error::Unsupported(
                "no local filesystem path for a streaming handle".to_string(),
            )),
        }
    }

    pub async fn close(self) -> Result<()> {
        match self.sink {
            TextSink::Materialized(writer) => writer.close().await,
            TextSink::Streaming(writer) => writer.close().await,
        }
    }
}
