//! Typed configuration for the Prism development engine.
//!
//! Every subsystem reads its own section:
//!
//! - [`RegistryConfig`] - component registry subscriber channels
//! - [`CacheConfig`] - build artifact cache capacity and TTL
//! - [`BuildConfig`] - worker pool size, queue capacity and backpressure
//! - [`HubConfig`] - live-update connection limits, keep-alive and rate limiting
//!
//! [`EngineConfig`] aggregates the sections and knows how to load itself from
//! defaults, an optional TOML file and `PRISM_` environment variables.

pub mod build;
pub mod engine;
pub mod error;
pub mod hub;

pub use build::*;
pub use engine::*;
pub use error::*;
pub use hub::*;
