//! Object storage abstraction and backends for cirrus.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait: stat, ranged reads, whole-object transfer,
//!   and multipart upload primitives
//! - Backends: local filesystem and an in-memory store with operation
//!   counters for tests

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectMeta, ObjectStore};
