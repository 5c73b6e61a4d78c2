//! Domain primitives: Identity, UserId, LinkId.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrimitiveParseError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// In-game account identifier (Minecraft uuid).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Create an Identity, rejecting empty or whitespace-only input.
    pub fn new(raw: impl Into<String>) -> Result<Self, PrimitiveParseError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveParseError::Empty("identity"));
        }
        Ok(Identity(trimmed.to_string()))
    }

    /// Get the identity as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = PrimitiveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::new(s)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user in the external service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Result<Self, PrimitiveParseError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveParseError::Empty("user id"));
        }
        Ok(UserId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = PrimitiveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserId::new(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row id of a persisted link.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LinkId(pub i64);

impl LinkId {
    pub fn new(id: i64) -> Self {
        LinkId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_empty() {
        assert_eq!(
            Identity::new("   "),
            Err(PrimitiveParseError::Empty("identity"))
        );
        assert!(Identity::from_str("").is_err());
    }

    #[test]
    fn test_identity_trims_whitespace() {
        let id = Identity::new(" abc-uuid ").unwrap();
        assert_eq!(id.as_str(), "abc-uuid");
        assert_eq!(id.to_string(), "abc-uuid");
    }

    #[test]
    fn test_user_id_rejects_empty() {
        let err = UserId::new("").unwrap_err();
        assert_eq!(err.to_string(), "user id must not be empty");
    }

    #[test]
    fn test_link_id_serializes_as_number() {
        let json = serde_json::to_string(&LinkId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
