//! Tests for default values.

use prism_config::{Backpressure, BuildConfig, CacheConfig, EngineConfig, HubConfig, RegistryConfig};
use std::time::Duration;

#[test]
fn registry_config_defaults() {
    assert_eq!(RegistryConfig::default().watcher_capacity, 100);
}

#[test]
fn cache_config_defaults() {
    let cache = CacheConfig::default();
    assert_eq!(cache.max_bytes, 64 * 1024 * 1024);
    assert!(cache.max_entries.is_none());
    assert_eq!(cache.ttl(), Duration::from_secs(3600));
}

#[test]
fn build_config_defaults() {
    let build = BuildConfig::default();
    assert_eq!(build.workers, 4);
    assert_eq!(build.queue_capacity, 1024);
    assert_eq!(build.backpressure, Backpressure::Reject);
}

#[test]
fn hub_config_defaults() {
    let hub = HubConfig::default();
    assert!(hub.allowed_origins.is_empty());
    assert!(hub.allow_localhost);
    assert_eq!(hub.max_connections, 100);
    assert_eq!(hub.max_connections_per_ip, 10);
    assert_eq!(hub.max_missed_pings, 3);
    assert_eq!(hub.ping_interval(), Duration::from_secs(30));
    assert_eq!(hub.idle_timeout(), Duration::from_secs(90));
    assert_eq!(hub.rate_limit.max_messages, 100);
    assert_eq!(hub.rate_limit.window(), Duration::from_secs(60));
}

#[test]
fn empty_json_yields_defaults() {
    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
}
