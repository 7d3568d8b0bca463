//! Content hashing and build fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// A 128-bit content hash computed using XXH3.
///
/// Two byte streams with the same `ContentHash` are assumed to be identical.
/// Used to key the session product table and to verify cached payloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes a content hash over several byte slices.
    ///
    /// Each part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn from_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Xxh3::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hasher.digest128().to_le_bytes())
    }

    /// Returns the raw little-endian bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// The recursive content-addressing key of a dependency.
///
/// A fingerprint covers an asset's serialized form, the fingerprints of
/// everything it builds from, the transform version, and the build
/// parameters. Equal fingerprints imply equivalent build products.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Creates a fingerprint from its raw bytes.
    pub fn from_raw(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the fingerprint.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Domain tags mixed into the stream so differently-typed inputs never collide.
const TAG_BYTES: u8 = 0x01;
const TAG_HASH: u8 = 0x02;
const TAG_U64: u8 = 0x03;
const TAG_STR: u8 = 0x04;

/// Incremental builder for a [`Fingerprint`].
///
/// Every input is tagged and length-prefixed before it is fed to XXH3-128,
/// which keeps the result stable across platforms.
pub struct FingerprintBuilder {
    hasher: Xxh3,
}

impl FingerprintBuilder {
    /// Starts a new fingerprint under the given domain label.
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Xxh3::new(),
        };
        builder.push_str(domain);
        builder
    }

    /// Mixes raw bytes into the fingerprint.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&[TAG_BYTES]);
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Mixes a 16-byte hash value (content hash, fingerprint, identity).
    pub fn push_hash(&mut self, bytes: &[u8; 16]) -> &mut Self {
        self.hasher.update(&[TAG_HASH]);
        self.hasher.update(bytes);
        self
    }

    /// Mixes an integer.
    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&[TAG_U64]);
        self.hasher.update(&value.to_le_bytes());
        self
    }

    /// Mixes a string.
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.hasher.update(&[TAG_STR]);
        self.hasher.update(&(value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Finishes and returns the fingerprint.
    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.hasher.digest128().to_le_bytes())
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}
