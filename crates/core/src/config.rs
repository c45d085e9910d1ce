//! Client configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Hook used to guess a content type for an object key at upload time.
///
/// Only consulted by the materializing write-close path; streaming uploads
/// never set a content type.
pub type ContentTypeFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Strategy for local materialization of remote objects.
///
/// The variants differ only in whether a local cache file exists and how
/// long it lives; dispatch happens once per `open()` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Never touch local disk; range reads and multipart writes only.
    Streaming,
    /// Cache file is evicted as soon as the handle is closed.
    CloseFile,
    /// Cache entry is evicted when the owning `RemoteObject` is dropped.
    PerObject,
    /// Cache lives in a temp dir owned by the client, removed on client drop.
    #[default]
    TempDir,
    /// Cache lives in a caller-supplied directory and is never auto-removed.
    Persistent,
}

impl CacheMode {
    /// Whether this mode materializes objects into local cache files.
    pub fn uses_local_cache(&self) -> bool {
        !matches!(self, Self::Streaming)
    }

    /// Read the mode from [`crate::CACHE_MODE_ENV`], if set.
    pub fn from_environment() -> Result<Option<Self>> {
        match std::env::var(crate::CACHE_MODE_ENV) {
            Ok(value) if !value.is_empty() => value.to_lowercase().parse().map(Some),
            _ => Ok(None),
        }
    }
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "streaming" => Ok(Self::Streaming),
            "close_file" => Ok(Self::CloseFile),
            "per_object" => Ok(Self::PerObject),
            "tmp_dir" => Ok(Self::TempDir),
            "persistent" => Ok(Self::Persistent),
            other => Err(Error::InvalidCacheMode(other.to_string())),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Streaming => "streaming",
            Self::CloseFile => "close_file",
            Self::PerObject => "per_object",
            Self::TempDir => "tmp_dir",
            Self::Persistent => "persistent",
        };
        f.write_str(name)
    }
}

/// Newline convention for text-mode handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Newline {
    /// Unix newlines (`\n`).
    #[default]
    Lf,
    /// Windows newlines (`\r\n`).
    CrLf,
}

impl Newline {
    /// The byte sequence written for each logical newline.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// Client-level configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How opens are dispatched between materializing and streaming I/O.
    #[serde(default)]
    pub cache_mode: CacheMode,
    /// Root directory for cached files. `None` means a client-owned temp dir
    /// (ignored in streaming mode).
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    /// Read-ahead buffer size for streaming reads, in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Part size for streaming multipart writes, in bytes.
    ///
    /// Real object stores typically reject non-final parts smaller than
    /// [`crate::MIN_PART_SIZE`]; smaller values are accepted here so tests
    /// can exercise multi-part uploads with tiny payloads.
    #[serde(default = "default_part_size")]
    pub part_size: usize,
    /// Newline convention for text-mode handles.
    #[serde(default)]
    pub newline: Newline,
    /// Content-type guesser consulted on materializing write-close.
    #[serde(skip)]
    pub content_type: Option<ContentTypeFn>,
}

fn default_buffer_size() -> usize {
    crate::DEFAULT_BUFFER_SIZE
}

fn default_part_size() -> usize {
    crate::DEFAULT_PART_SIZE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_mode: CacheMode::default(),
            cache_root: None,
            buffer_size: default_buffer_size(),
            part_size: default_part_size(),
            newline: Newline::default(),
            content_type: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cache_mode", &self.cache_mode)
            .field("cache_root", &self.cache_root)
            .field("buffer_size", &self.buffer_size)
            .field("part_size", &self.part_size)
            .field("newline", &self.newline)
            .field("content_type", &self.content_type.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ClientConfig {
    /// Build a configuration from defaults plus environment overrides.
    ///
    /// [`crate::CACHE_MODE_ENV`] and [`crate::CACHE_DIR_ENV`] are read once
    /// here; explicit field assignment afterwards always wins.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(mode) = CacheMode::from_environment()? {
            config.cache_mode = mode;
        }
        if let Ok(dir) = std::env::var(crate::CACHE_DIR_ENV) {
            if !dir.is_empty() {
                config.cache_root = Some(PathBuf::from(dir));
            }
        }
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be non-zero".to_string());
        }
        if self.part_size == 0 {
            return Err("part_size must be non-zero".to_string());
        }
        if self.cache_mode == CacheMode::Persistent && self.cache_root.is_none() {
            return Err("persistent cache mode requires cache_root".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_mode_roundtrip() {
        for mode in [
            CacheMode::Streaming,
            CacheMode::CloseFile,
            CacheMode::PerObject,
            CacheMode::TempDir,
            CacheMode::Persistent,
        ] {
            let parsed: CacheMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("sideways".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_default_config_validates() {
        let config = ClientConfig::default();
        assert_eq!(config.cache_mode, CacheMode::TempDir);
        assert_eq!(config.buffer_size, crate::DEFAULT_BUFFER_SIZE);
        config.validate().unwrap();
    }

    #[test]
    fn test_persistent_requires_root() {
        let config = ClientConfig {
            cache_mode: CacheMode::Persistent,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            cache_mode: CacheMode::Persistent,
            cache_root: Some(PathBuf::from("/tmp/cirrus")),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = ClientConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            part_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_streaming_never_uses_cache() {
        assert!(!CacheMode::Streaming.uses_local_cache());
        assert!(CacheMode::TempDir.uses_local_cache());
        assert!(CacheMode::Persistent.uses_local_cache());
    }
}
