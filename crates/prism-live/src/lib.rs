//! Prism live updates.
//!
//! Pushes rebuild notifications to browsers over WebSockets:
//!
//! - [`LiveUpdateHub`] - single-owner connection table, admission control and broadcast
//! - [`UpdateMessage`] - the JSON message browsers receive
//! - [`OriginValidator`] / [`RateLimiter`] - pluggable admission and inbound limits
//! - [`server`] - axum router and `serve` helper
//! - [`DevCoordinator`] - wires registry events and file changes to builds and broadcasts
//! - [`logger`] - tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prism_config::HubConfig;
//! use prism_live::{AllowListOriginValidator, LiveUpdateHub, UpdateMessage, server};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::default();
//! let validator = Arc::new(AllowListOriginValidator::from_config(&config));
//! let hub = LiveUpdateHub::start(config, validator);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3001").await?;
//! let token = CancellationToken::new();
//! tokio::spawn(server::serve(listener, Arc::clone(&hub), token.clone()));
//!
//! hub.broadcast(&UpdateMessage::full_reload()).await?;
//! token.cancel();
//! # Ok(())
//! # }
//! ```

mod client;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod logger;
pub mod message;
pub mod origin;
pub mod rate_limit;
pub mod server;

pub use coordinator::DevCoordinator;
pub use error::{DisconnectReason, HubError, Result};
pub use hub::{
    Admission, ClientControl, ClientHandle, ClientId, ConnectedClient, ConnectionSlot, HubStats,
    LiveUpdateHub, RateLimiterFactory,
};
pub use message::{UpdateKind, UpdateMessage};
pub use origin::{AllowListOriginValidator, OriginValidator};
pub use rate_limit::{RateLimiter, SlidingWindowLimiter};
pub use server::{LIVE_UPDATE_PATH, router, serve};
