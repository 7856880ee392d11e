//! Hierarchical identifiers addressing a value on a remote device.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Dotted object identifier such as `1.3.6.1.4.1.25728.8900.1.1.2.1`.
///
/// Stored as its numeric arcs so that `"1.3.6"` and `".1.3.6"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(Vec<u32>);

impl ObjectId {
    /// Parses a dotted identifier. A single leading dot is accepted.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let invalid = |reason: &str| DomainError::InvalidIdentifier {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(invalid("empty identifier"));
        }

        let arcs = body
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| invalid("non-numeric arc")))
            .collect::<DomainResult<Vec<u32>>>()?;

        if arcs.len() < 2 {
            return Err(invalid("at least two arcs required"));
        }

        Ok(Self(arcs))
    }

    /// Returns the numeric arcs.
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// Returns true if `self` lies at or below `prefix` in the tree.
    pub fn starts_with(&self, prefix: &ObjectId) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(value: ObjectId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let oid = ObjectId::parse("1.3.6.1.4.1.25728.8900.1.1.2.1").unwrap();
        assert_eq!(oid.arcs().len(), 12);
        assert_eq!(oid.to_string(), "1.3.6.1.4.1.25728.8900.1.1.2.1");
    }

    #[test]
    fn test_leading_dot_is_equivalent() {
        let a = ObjectId::parse(".1.3.6.1").unwrap();
        let b = ObjectId::parse("1.3.6.1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ObjectId::parse("").is_err());
        assert!(ObjectId::parse(".").is_err());
        assert!(ObjectId::parse("1").is_err());
        assert!(ObjectId::parse("1.3.x").is_err());
        assert!(ObjectId::parse("1..3").is_err());
        assert!(ObjectId::parse("1.3.-6").is_err());
    }

    #[test]
    fn test_starts_with() {
        let prefix = ObjectId::parse("1.3.6.1.4.1.25728").unwrap();
        let leaf = ObjectId::parse("1.3.6.1.4.1.25728.8900.1.1.2.1").unwrap();
        assert!(leaf.starts_with(&prefix));
        assert!(!prefix.starts_with(&leaf));
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            oid: ObjectId,
        }
        let w: Wrapper = toml::from_str(r#"oid = "1.3.6.1.2.1.1.3.0""#).unwrap();
        assert_eq!(w.oid.to_string(), "1.3.6.1.2.1.1.3.0");

        let bad: Result<Wrapper, _> = toml::from_str(r#"oid = "not.an.oid""#);
        assert!(bad.is_err());
    }
}
