//! Parsing and validation of `anvil.toml` engine configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`EngineConfig`] describing parallelism, build parameters, the build-state
//! location, and the content cache tiers.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
