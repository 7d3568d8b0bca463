//! Values that flow through a build: source assets, products, and build parameters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anvil_common::{ContentHash, FingerprintBuilder};
use anvil_config::BuildSection;
use serde::{Deserialize, Serialize};

/// The tag naming which transform handles an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransformKind(String);

impl TransformKind {
    /// Creates a kind tag.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransformKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// A read-only source asset as fetched from the source store.
///
/// `asset_type` is the declared type used to look up its transform; `data`
/// is the serialized configuration the transform consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceAsset {
    /// Declared asset type, the transform registry key.
    pub asset_type: String,
    /// Serialized asset content.
    pub data: Vec<u8>,
}

impl SourceAsset {
    /// Creates an asset of the given type.
    pub fn new(asset_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            asset_type: asset_type.into(),
            data: data.into(),
        }
    }

    /// Hash of the asset's type and serialized content.
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::from_parts([self.asset_type.as_bytes(), self.data.as_slice()])
    }
}

/// The output of one transform invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    data: Vec<u8>,
}

impl Product {
    /// Wraps produced bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// The produced bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for an empty product.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the product and returns its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Shared handle to a product. Consumers of a de-duplicated build observe the same `Arc`.
pub type ProductRef = Arc<Product>;

/// Parameters handed to every transform and mixed into every fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    /// Build configuration name, e.g. `debug` or `release`.
    pub configuration: String,
    /// Free-form options such as the target platform.
    pub options: BTreeMap<String, String>,
}

impl BuildParams {
    /// Creates parameters for a named configuration with no options.
    pub fn new(configuration: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            options: BTreeMap::new(),
        }
    }

    /// Builder-style option setter.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Takes the parameters from the `[build]` section of `anvil.toml`.
    pub fn from_config(build: &BuildSection) -> Self {
        Self {
            configuration: build.configuration.clone(),
            options: build.options.clone(),
        }
    }

    /// Mixes the parameters into a fingerprint. Options are fed in key order.
    pub fn salt(&self, builder: &mut FingerprintBuilder) {
        builder
            .push_str(&self.configuration)
            .push_u64(self.options.len() as u64);
        for (key, value) in &self.options {
            builder.push_str(key).push_str(value);
        }
    }
}

impl Default for BuildParams {
    fn default() -> Self {
        Self::new("default")
    }
}
