//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Node configuration.
    #[serde(default)]
    pub node: NodeConfig,
    /// Database configuration. Only the front node connects to a database.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Punishment engine configuration.
    #[serde(default)]
    pub punishment: PunishmentConfig,
}

/// Which side of the mute sync channel this process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Authoritative node owning punishment state and persistence.
    #[default]
    Front,
    /// Game server enforcing mutes from a replicated cache.
    Backend,
}

/// Node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Role of this process.
    #[serde(default)]
    pub role: NodeRole,
    /// Name used in logs.
    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::default(),
            name: default_node_name(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. The scheme selects the dialect (postgres, mysql, sqlite).
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix for all Redis keys and channels.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

impl RedisConfig {
    /// Name of the channel carrying mute sync messages.
    #[must_use]
    pub fn mute_channel(&self) -> String {
        format!("{}:mutedata", self.prefix)
    }
}

/// Punishment engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PunishmentConfig {
    /// Upper bound for actor and punishment lookups while loading a log.
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    /// Interval between expiry sweeps on the front node.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum number of undelivered mute sync messages kept for retry.
    #[serde(default = "default_pending_sync_limit")]
    pub pending_sync_limit: usize,
}

impl Default for PunishmentConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_secs: default_resolve_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            pending_sync_limit: default_pending_sync_limit(),
        }
    }
}

fn default_node_name() -> String {
    "front".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "warden".to_string()
}

const fn default_resolve_timeout_secs() -> u64 {
    10
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_pending_sync_limit() -> usize {
    1024
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `WARDEN_ENV`)
    /// 3. Environment variables with `WARDEN_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
