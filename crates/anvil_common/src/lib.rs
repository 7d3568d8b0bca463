//! Shared foundational types used across the Anvil asset build engine.
//!
//! This crate provides asset identities, content hashes, and the fingerprint
//! type used as the cache key for every build product.

#![warn(missing_docs)]

pub mod hash;
pub mod identity;

pub use hash::{ContentHash, Fingerprint, FingerprintBuilder};
pub use identity::{Identity, ParseIdentityError};
