//! File-like cached and streaming I/O over remote object stores.
//!
//! The [`Client`] wraps any [`cirrus_storage::ObjectStore`] backend and adds:
//! - A local materialization cache with mtime-pinned freshness checks and
//!   upload-if-changed writeback ([`CacheMode`] controls its lifetime)
//! - Streaming reads (buffered range fetches) and streaming writes
//!   (multipart upload) that never touch local disk
//! - Text-mode wrappers with newline translation and line iteration
//!
//! ```no_run
//! use cirrus_client::Client;
//! use cirrus_core::ClientConfig;
//! use cirrus_storage::{FilesystemBackend, ObjectStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> cirrus_client::Result<()> {
//! let backend = Arc::new(FilesystemBackend::new("/srv/bucket").await?);
//! let client = Client::new(backend as Arc<dyn ObjectStore>, ClientConfig::default())?;
//!
//! client.write_text("greeting.txt", "hello\n").await?;
//! let mut reader = client.open_text_read("greeting.txt").await?;
//! while let Some(line) = reader.next_line().await? {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod error;
mod materialized;
mod object;
mod stream;
mod text;

pub use client::{Client, ObjectReader, ObjectWriter, OpenOptions};
pub use error::{Error, Result};
pub use materialized::{MaterializedFile, MaterializedWriter};
pub use object::RemoteObject;
pub use stream::{StreamingReader, StreamingWriter};
pub use text::{TextReader, TextWriter};

pub use cirrus_core::config::{CacheMode, ClientConfig, Newline};
