//! Session identifiers.
//!
//! A session id is 16 upper-case hexadecimal characters, generated from a
//! random 64-bit value when a brand-new session is opened.

use crate::error::{DrmError, DrmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hexadecimal characters in a session id.
pub const SESSION_ID_LEN: usize = 16;

/// Identifier of one continuous licence-holding period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{:016X}", rand::random::<u64>()))
    }

    /// Generates a session id guaranteed to differ from `previous`.
    #[must_use]
    pub fn generate_after(previous: Option<&SessionId>) -> Self {
        loop {
            let id = Self::generate();
            if Some(&id) != previous {
                return id;
            }
        }
    }

    /// Parses a session id, accepting either hex case.
    pub fn parse(s: &str) -> DrmResult<Self> {
        if s.len() != SESSION_ID_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DrmError::BadFormat(format!(
                "session id must be {SESSION_ID_LEN} hexadecimal characters, got {s:?}"
            )));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = DrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = DrmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
