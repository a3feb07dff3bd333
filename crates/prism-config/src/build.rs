//! Registry, cache and build pipeline configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Buffer size of every channel handed out by `watch()`.
    #[serde(default = "default_watcher_capacity")]
    pub watcher_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            watcher_capacity: default_watcher_capacity(),
        }
    }
}

/// Build artifact cache limits.
///
/// `max_bytes` is the hard capacity; `max_entries` optionally caps the entry
/// count as well. Entries older than `ttl_ms` are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,

    #[serde(default)]
    pub max_entries: Option<usize>,

    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_cache_max_bytes(),
            max_entries: None,
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

/// What `build()` does when the task queue is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Fail the enqueue immediately with a queue-full error.
    #[default]
    Reject,
    /// Wait until a worker frees a slot.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub backpressure: Backpressure,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            backpressure: Backpressure::default(),
        }
    }
}

fn default_watcher_capacity() -> usize {
    100
}

fn default_cache_max_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_cache_ttl_ms() -> u64 {
    60 * 60 * 1000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_serializes_lowercase() {
        let json = serde_json::to_string(&Backpressure::Block).unwrap();
        assert_eq!(json, "\"block\"");

        let parsed: Backpressure = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(parsed, Backpressure::Reject);
    }

    #[test]
    fn test_partial_build_section_keeps_defaults() {
        let config: BuildConfig = serde_json::from_str(r#"{ "workers": 2 }"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backpressure, Backpressure::Reject);
    }

    #[test]
    fn test_cache_ttl_duration() {
        let config = CacheConfig {
            ttl_ms: 1500,
            ..CacheConfig::default()
        };
        assert_eq!(config.ttl(), Duration::from_millis(1500));
    }
}
