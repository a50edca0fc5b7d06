//! Normalized lookup keys.
//!
//! Service and tier names are matched case-insensitively. Resource and
//! operation names are not keys and stay exact. Normalization is ASCII
//! lower-casing only: it never depends on the process locale.

use core::borrow::Borrow;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// A case-normalized table key (`"Backend"` and `"backend"` are the same key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LookupKey(String);

impl LookupKey {
    /// Normalize `raw` into a key. Empty input yields an empty key; use
    /// [`LookupKey::parse`] where emptiness is an error.
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// Normalize `raw`, rejecting empty input.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() {
            return Err(CoreError::validation("lookup key must not be empty"));
        }
        Ok(Self::new(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

}

/// ASCII lower-case `raw`.
pub fn normalize(raw: &str) -> String {
    raw.to_ascii_lowercase()
}

impl core::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for LookupKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for LookupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LookupKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl FromStr for LookupKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for LookupKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}
