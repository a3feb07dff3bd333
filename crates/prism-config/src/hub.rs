//! Live-update hub configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Exact origins (`scheme://host[:port]`) allowed to open a connection.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Accept any port on `localhost`, `127.0.0.1` and `[::1]`.
    #[serde(default = "default_allow_localhost")]
    pub allow_localhost: bool,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Per-client outbound queue length. A full queue marks a slow consumer.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_buffer: usize,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_max_missed_pings")]
    pub max_missed_pings: u32,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl HubConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_localhost: default_allow_localhost(),
            max_connections: default_max_connections(),
            max_connections_per_ip: default_max_connections_per_ip(),
            outbound_queue: default_outbound_queue(),
            broadcast_buffer: default_broadcast_buffer(),
            ping_interval_ms: default_ping_interval_ms(),
            max_missed_pings: default_max_missed_pings(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_message_bytes: default_max_message_bytes(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Sliding-window limit on messages received from a single client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: default_rate_max_messages(),
            window_ms: default_rate_window_ms(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    Vec::new()
}

fn default_allow_localhost() -> bool {
    true
}

fn default_max_connections() -> usize {
    100
}

fn default_max_connections_per_ip() -> usize {
    10
}

fn default_outbound_queue() -> usize {
    256
}

fn default_broadcast_buffer() -> usize {
    256
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_max_missed_pings() -> u32 {
    3
}

fn default_idle_timeout_ms() -> u64 {
    90_000
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_rate_max_messages() -> usize {
    100
}

fn default_rate_window_ms() -> u64 {
    60_000
}
