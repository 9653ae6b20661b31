//! Application configuration from file and environment variables
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables (prefixed with ROLLOUT_)
//! 2. Config file (config.toml)
//! 3. Default values
//!
//! Secrets like the database password and the admin token should be kept in
//! environment variables, not in the config file.

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global application configuration
pub static APP_CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config file, using defaults: {}", e);
        AppConfig::default()
    })
});

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Worker threads; 0 uses actix-web's default (one per core)
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            workers: 0,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (should be in env var ROLLOUT_DATABASE__URL or DATABASE_URL)
    pub url: String,
    pub max_connections: u32,
    /// Create missing tables on startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rollout.db?mode=rwc".to_string(),
            max_connections: 10,
            auto_migrate: true,
        }
    }
}

/// Admin surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for /admin routes (should be in env var ROLLOUT_ADMIN__API_TOKEN).
    /// Empty disables the admin surface.
    pub api_token: String,
}

/// Assignment cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a resolved variant is served from memory; 0 disables the cache
    pub ttl_seconds: u64,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 60,
            max_capacity: 100_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        use config::FileFormat;

        let config = Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(File::new(path, FileFormat::Toml).required(false))
            // e.g., ROLLOUT_SERVER__BIND, ROLLOUT_ADMIN__API_TOKEN
            .add_source(
                Environment::with_prefix("ROLLOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;

        // Conventional fallback used by most hosting platforms
        if app.database.url == DatabaseConfig::default().url {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                app.database.url = url;
            }
        }

        Ok(app)
    }
}

/// Initialize application configuration
///
/// This triggers the lazy loading of the config file and logs the result.
/// Should be called early in application startup.
pub fn init() {
    let config = get_config();
    log::info!(
        "Configuration loaded: server.bind = {}, cache.ttl_seconds = {}, admin surface {}",
        config.server.bind,
        config.cache.ttl_seconds,
        if config.admin.api_token.is_empty() {
            "disabled"
        } else {
            "enabled"
        }
    );
}

/// Get the current application configuration
pub fn get_config() -> AppConfig {
    APP_CONFIG.clone()
}
