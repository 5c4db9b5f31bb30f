//! Acting identity supplied by the (external) identity provider.
//!
//! The store trusts these values; it only checks they can be put into a commit
//! signature.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid actor `{raw}`: {reason}")]
pub struct InvalidActor {
    pub raw: String,
    pub reason: &'static str,
}

/// Username of the human on whose behalf the store acts.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidActor> {
        let s = s.into();
        let reason = if s.trim().is_empty() {
            Some("empty")
        } else if s.chars().any(|c| c.is_control() || c == '<' || c == '>') {
            Some("contains characters not allowed in a commit signature")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidActor { raw: s, reason }),
            None => Ok(Self(s)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ActorId {
    type Error = InvalidActor;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ActorId> for String {
    fn from(id: ActorId) -> Self {
        id.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({:?})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user and the role the identity provider vouched for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: String,
}

impl Actor {
    pub fn new(id: ActorId, role: impl Into<String>) -> Self {
        Self {
            id,
            role: role.into(),
        }
    }

    /// Convenience for callers holding raw strings.
    pub fn parse(username: &str, role: &str) -> Result<Self, InvalidActor> {
        Ok(Self::new(ActorId::new(username)?, role))
    }

    pub fn username(&self) -> &str {
        self.id.as_str()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
