//! [`VaultId`] implementation.

use crate::{UuidError, UuidResult};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// Canonical identifier for logical files, users and access groups.
///
/// Once constructed the inner UUID always displays as 32 lowercase hex characters.
///
/// # Construction
/// - [`VaultId::new`] generates a new random identifier.
/// - [`VaultId::parse`] validates an identifier already in canonical form.
/// - [`VaultId::parse_lenient`] normalises any form accepted by the `uuid` crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaultId(Uuid);

impl Default for VaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultId {
    /// Generates a new random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Validates and parses a UUID string that must already be canonical.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not 32 lowercase hex characters.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UuidError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| UuidError::InvalidInput(format!("{input}: {e}")))
    }

    /// Parses hyphenated, braced, uppercase or canonical input.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not a UUID in any recognised form.
    pub fn parse_lenient(input: &str) -> UuidResult<Self> {
        Uuid::parse_str(input.trim())
            .map(Self)
            .map_err(|e| UuidError::InvalidInput(format!("'{}' is not a UUID: {}", input, e)))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// True for the all-zero UUID, which callers use to mean "not supplied".
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Returns true if `input` is in canonical form.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for VaultId {
    type Err = UuidError;

    /// Equivalent to [`VaultId::parse_lenient`]; output is always canonical.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VaultId::parse_lenient(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for VaultId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for VaultId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        VaultId::parse_lenient(&s).map_err(serde::de::Error::custom)
    }
}
