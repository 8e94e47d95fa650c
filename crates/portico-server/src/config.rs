//! Server configuration.
//!
//! Loaded from a TOML file (path from `PORTICO_CONFIG` or the default
//! `portico.toml`), then overridden by `PORTICO_*` environment variables,
//! with serde defaults for every field so an absent file yields a runnable
//! single-instance setup: Redis disabled, in-process durable tier, admin
//! surface on localhost.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8680
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Enable the Redis durable tier. Disabled, the cache runs over an
    /// in-process durable backend (single-instance mode).
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Interval of the background memory sweep, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable or unparsable files and for invalid
    /// settings — a present-but-broken config must fail loudly, not fall
    /// back to defaults.
    pub fn load(path: &str) -> Result<Self, String> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => {
                toml::from_str::<AppConfig>(&raw).map_err(|e| format!("invalid config {path}: {e}"))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => return Err(format!("failed to read config {path}: {e}")),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORTICO_*` environment overrides on top of the file values.
    /// The lookup is injected so tests need not mutate the process
    /// environment.
    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), String> {
        if let Some(host) = lookup("PORTICO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORTICO_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| format!("invalid PORTICO_PORT: {e}"))?;
        }
        if let Some(url) = lookup("PORTICO_REDIS_URL") {
            self.redis.url = url;
            self.redis.enabled = true;
        }
        if let Some(level) = lookup("PORTICO_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.redis.enabled && self.redis.url.is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        let level = self.logging.level.to_ascii_lowercase();
        let valid = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid.contains(&level.as_str()) {
            return Err(format!("logging.level must be one of {valid:?}"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("invalid listen address: {e}"))
    }
}
