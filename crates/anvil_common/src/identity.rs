//! Stable 128-bit identities for source assets and build outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace used when deriving identities from names.
const NAME_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_4c2e_9b7d_4e01_8f3a_2d5c_7e90_b1a4);

/// The globally unique key naming one source asset instance or output.
///
/// Identities are stable across rebuilds and are the primary key of every
/// store, cache, and table in the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(Uuid);

impl Identity {
    /// The all-zero identity.
    pub const NIL: Identity = Identity(Uuid::nil());

    /// Wraps an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates an identity from a raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Derives a stable identity from a name (UUID v5).
    ///
    /// The same name always yields the same identity on every platform.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&NAME_NAMESPACE, name.as_bytes()))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the raw 16 bytes in big-endian order.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the identity as a 128-bit integer.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0.hyphenated())
    }
}

/// Error returned when parsing an [`Identity`] from text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identity '{input}'")]
pub struct ParseIdentityError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for Identity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Identity)
            .map_err(|_| ParseIdentityError {
                input: s.to_string(),
            })
    }
}
