//! Streaming I/O directly against the object store, bypassing local disk.

pub mod read;
pub mod write;

pub use read::StreamingReader;
pub use write::StreamingWriter;
