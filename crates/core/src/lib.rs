//! Core domain types shared across the cirrus crates.
//!
//! This crate defines the canonical data model used by the storage and
//! client crates:
//! - Cache mode and client configuration
//! - Multipart upload identifiers and lifecycle
//! - Shared size constants

pub mod config;
pub mod error;
pub mod upload;

pub use config::{CacheMode, ClientConfig, ContentTypeFn, Newline};
pub use error::{Error, Result};
pub use upload::{PartTag, UploadId, UploadPhase};

/// Default read-ahead / write-behind buffer size: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default multipart part size: 8 MiB.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Minimum multipart part size accepted by most object stores: 5 MiB.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Environment variable consulted for the default cache mode.
pub const CACHE_MODE_ENV: &str = "CIRRUS_CACHE_MODE";

/// Environment variable consulted for the default cache root directory.
pub const CACHE_DIR_ENV: &str = "CIRRUS_CACHE_DIR";
