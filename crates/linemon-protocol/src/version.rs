//! Protocol version selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Management protocol version used for a request or carried by a message.
///
/// Only the community-string versions are supported; they share the
/// request/response and notification semantics the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[default]
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "2c")]
    V2c,
}

impl ProtocolVersion {
    /// Parses a version string: `1`, `v1`, `2c` or `v2c` (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let normalized = s.trim().to_ascii_lowercase();
        let bare = normalized.strip_prefix('v').unwrap_or(&normalized);
        match bare {
            "1" => Ok(Self::V1),
            "2c" => Ok(Self::V2c),
            _ => Err(VersionError::Unsupported(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2c => "2c",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_str())
    }
}

/// Errors related to protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Unsupported protocol version: {0} (expected 1 or 2c)")]
    Unsupported(String),
}
