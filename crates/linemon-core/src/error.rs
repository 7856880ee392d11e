//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
///
/// These are configuration-time errors: a line whose settings fail to
/// validate stays `Unknown` and is never scheduled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Identifier string is not a dotted sequence of sub-identifiers
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    /// Color string is not `#RRGGBB`
    #[error("Invalid color '{0}' (expected #RRGGBB)")]
    InvalidColor(String),

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Two devices or two lines of one device share a name
    #[error("Duplicate {kind}: {name}")]
    Duplicate { kind: &'static str, name: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
