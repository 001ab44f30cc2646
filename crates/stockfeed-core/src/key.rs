//! Symbol key type.
//!
//! Every subscription, rolling window and inbound update is indexed by a
//! `Key`. Keys are case-normalized at construction so that `"aapl"`,
//! `" AAPL "` and `"AAPL"` all address the same subscription.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Normalized symbol identifier (e.g., "AAPL", "BRK.B").
///
/// Uniqueness is exact string equality on the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Parse and normalize a raw symbol.
    ///
    /// Trims surrounding whitespace and upper-cases the result. Empty input,
    /// embedded whitespace and control characters are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidKey(raw.to_string()));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(CoreError::InvalidKey(raw.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Key {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Key {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}
