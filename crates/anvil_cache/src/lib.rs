//! Build product caching and persistent build state.
//!
//! This crate provides the pluggable [`ContentCache`] abstraction with a local
//! filesystem tier, a network tier and its server, a priority-ordered
//! [`CacheChain`], and the transactional [`BuildStateStore`] that records which
//! fingerprint last produced each output.

#![warn(missing_docs)]

pub mod artifact;
pub mod chain;
pub mod content;
pub mod error;
pub mod local;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod state;

pub use chain::CacheChain;
pub use content::{CacheAccess, CacheKey, CacheWriter, ContentCache};
pub use error::CacheError;
pub use local::LocalCache;
pub use remote::RemoteCache;
pub use server::{CacheServer, ServerHandle, DEFAULT_SERVER_WORKERS};
pub use state::BuildStateStore;
