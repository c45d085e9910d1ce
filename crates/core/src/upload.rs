//! Multipart upload identifiers and lifecycle.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a multipart upload session.
///
/// Backends that carry their own upload tokens (S3 upload IDs, Azure block
/// list sessions) map them to and from this type at the trait boundary.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(String);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a backend-issued token.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse from a string, rejecting empty tokens.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidUploadId("empty token".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receipt for one uploaded part.
///
/// Parts are completed in ascending `index` order; `tag` is the backend's
/// opaque acknowledgement (an etag for S3-like stores).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartTag {
    /// 1-based position of the part within the upload.
    pub index: u32,
    /// Backend-issued receipt for the part.
    pub tag: String,
}

impl PartTag {
    pub fn new(index: u32, tag: impl Into<String>) -> Self {
        Self {
            index,
            tag: tag.into(),
        }
    }
}

/// Lifecycle of a streaming write session.
///
/// The only legal terminal transitions are from `InProgress`; completion is
/// attempted at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    /// No part has been uploaded; a whole-object put is still possible.
    NotStarted,
    /// A multipart upload exists and parts are being staged.
    InProgress,
    /// The upload was committed (multipart completed or whole-object put).
    Completed,
    /// The upload was explicitly abandoned and cleaned up.
    Aborted,
    /// A transfer or completion call failed; staged parts may be orphaned.
    Failed,
}

impl UploadPhase {
    /// Whether the session can still accept data.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::NotStarted | Self::InProgress)
    }

    /// Whether the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    /// Advance to `next`, rejecting transitions the lifecycle does not allow.
    ///
    /// `Failed` is reachable from any active state; re-entering a terminal
    /// state (double completion, abort after commit) is an error.
    pub fn advance(self, next: UploadPhase) -> Result<UploadPhase> {
        let legal = match (self, next) {
            (Self::NotStarted, Self::InProgress) => true,
            (Self::NotStarted, Self::Completed) => true, // whole-object put
            (Self::InProgress, Self::Completed) => true,
            (Self::NotStarted | Self::InProgress, Self::Aborted) => true,
            (Self::NotStarted | Self::InProgress, Self::Failed) => true,
            _ => false,
        };
        if legal {
            Ok(next)
        } else {
            Err(Error::IllegalUploadTransition {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}
