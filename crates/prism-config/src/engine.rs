//! Top-level engine configuration and layered loading.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::build::{BuildConfig, CacheConfig, RegistryConfig};
use crate::error::{ConfigError, Result};
use crate::hub::HubConfig;

/// Environment variable prefix. Nested keys use `__`, e.g. `PRISM_BUILD__WORKERS=8`.
pub const ENV_PREFIX: &str = "PRISM_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub hub: HubConfig,
}

impl EngineConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// Later layers win: defaults < file < `PRISM_*` variables. The merged
    /// result is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Extract` if a layer cannot be deserialized and
    /// `ConfigError::InvalidValue` if the merged values fail validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file not found: {}", path.display()),
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: EngineConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.registry.watcher_capacity == 0 {
            return Err(ConfigError::invalid(
                "registry.watcher_capacity",
                "must be at least 1",
            ));
        }

        if self.build.workers == 0 {
            return Err(ConfigError::invalid("build.workers", "must be at least 1"));
        }
        if self.build.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "build.queue_capacity",
                "must be at least 1",
            ));
        }

        if self.cache.max_bytes == 0 {
            return Err(ConfigError::invalid(
                "cache.max_bytes",
                "must be positive; a zero capacity stores nothing",
            ));
        }
        if self.cache.ttl_ms == 0 {
            return Err(ConfigError::invalid("cache.ttl_ms", "must be positive"));
        }
        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::invalid(
                "cache.max_entries",
                "omit the field for no entry limit",
            ));
        }

        let hub = &self.hub;
        if hub.max_connections == 0 {
            return Err(ConfigError::invalid("hub.max_connections", "must be at least 1"));
        }
        if hub.max_connections_per_ip == 0 {
            return Err(ConfigError::invalid(
                "hub.max_connections_per_ip",
                "must be at least 1",
            ));
        }
        if hub.max_connections_per_ip > hub.max_connections {
            return Err(ConfigError::invalid(
                "hub.max_connections_per_ip",
                format!("cannot exceed hub.max_connections ({})", hub.max_connections),
            ));
        }
        if hub.outbound_queue == 0 || hub.broadcast_buffer == 0 {
            return Err(ConfigError::invalid(
                "hub.outbound_queue",
                "queue sizes must be at least 1",
            ));
        }
        if hub.ping_interval_ms == 0 {
            return Err(ConfigError::invalid("hub.ping_interval_ms", "must be positive"));
        }
        if hub.max_missed_pings == 0 {
            return Err(ConfigError::invalid("hub.max_missed_pings", "must be at least 1"));
        }
        if hub.idle_timeout_ms == 0 {
            return Err(ConfigError::invalid("hub.idle_timeout_ms", "must be positive"));
        }
        if hub.max_message_bytes == 0 {
            return Err(ConfigError::invalid("hub.max_message_bytes", "must be positive"));
        }
        if hub.rate_limit.max_messages == 0 || hub.rate_limit.window_ms == 0 {
            return Err(ConfigError::invalid(
                "hub.rate_limit",
                "max_messages and window_ms must be positive",
            ));
        }

        Ok(())
    }
}
