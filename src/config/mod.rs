/// Configuration management for votier
///
/// A `Config` is built once at process start (file, then environment
/// overrides, then validation) and handed to the coordinator by reference.
/// Nothing reads configuration from global state.

use crate::balancer::Strategy;
use crate::storage::StorageType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main votier configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This instance's advertised address
    pub server: ServerConfig,
    /// Tiered storage configuration
    pub storage: StorageConfig,
    /// Node selection configuration
    pub balancer: BalancerConfig,
    /// Health monitor configuration
    pub health: HealthConfig,
    /// Statically known cluster members
    pub cluster: ClusterConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host advertised for self-registration
    pub host: String,
    /// Port advertised for self-registration
    pub port: u16,
    /// Register this instance as a node at startup
    pub self_register: bool,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Primary backend
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Directory of the file backend (primary or backup tier)
    pub file_path: String,
    /// Maximum entries held by the memory backend
    pub cache_size: usize,
    /// Time-to-live of memory backend entries, in seconds
    pub cache_ttl_sec: u64,
    /// Remote KV connection settings
    pub redis: RedisConfig,
}

/// Remote KV (Redis protocol) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
}

/// Load balancer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub strategy: Strategy,
}

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Health check interval in seconds
    pub interval_sec: u64,
    /// Per-probe timeout in seconds
    pub timeout_sec: u64,
    /// Upper bound on waiting for the monitor task at shutdown, in seconds
    pub shutdown_timeout_sec: u64,
}

/// Statically configured cluster members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: Vec<StaticNodeConfig>,
}

/// A node registered from configuration at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticNodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_target: Option<String>,
}

fn default_weight() -> u32 {
    1
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            self_register: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            file_path: "data/records".to_string(),
            cache_size: 1000,
            cache_ttl_sec: 3600,
            redis: RedisConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            timeout_ms: 5000,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_sec: 30,
            timeout_sec: 5,
            shutdown_timeout_sec: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StorageConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_sec)
    }

    /// Reject sizes and addresses the storage tiers cannot be built with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage file_path cannot be empty".to_string(),
            ));
        }

        if self.cache_size == 0 {
            return Err(ConfigError::ValidationError(
                "storage cache_size must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl_sec == 0 {
            return Err(ConfigError::ValidationError(
                "storage cache_ttl_sec must be greater than 0".to_string(),
            ));
        }

        if self.storage_type == StorageType::Redis {
            if self.redis.host.trim().is_empty() || self.redis.port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid redis address: {}",
                    self.redis.address()
                )));
            }
            if self.redis.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "redis timeout_ms must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_sec)
    }

    /// Reject timings the monitor loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.timeout_sec >= self.interval_sec {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be less than interval_sec".to_string(),
            ));
        }

        if self.shutdown_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check shutdown_timeout_sec must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Environment variables consulted by `apply_env_overrides`
pub const ENV_PREFIX: &str = "VOTIER_";

impl Config {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Apply `VOTIER_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)))
    }

    /// Apply `(variable, value)` overrides; unknown variables are ignored
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "VOTIER_STORAGE_TYPE" => self.storage.storage_type = value.parse()?,
                "VOTIER_STORAGE_FILE_PATH" => self.storage.file_path = value,
                "VOTIER_REDIS_HOST" => self.storage.redis.host = value,
                "VOTIER_REDIS_PORT" => self.storage.redis.port = parse_number(&key, &value)?,
                "VOTIER_REDIS_DB" => self.storage.redis.db = parse_number(&key, &value)?,
                "VOTIER_REDIS_PASSWORD" => self.storage.redis.password = Some(value),
                "VOTIER_LB_STRATEGY" => self.balancer.strategy = value.parse()?,
                "VOTIER_LOG_LEVEL" => self.logging.level = value.to_ascii_lowercase(),
                "VOTIER_SERVER_HOST" => self.server.host = value,
                "VOTIER_SERVER_PORT" => self.server.port = parse_number(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server config
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server host cannot be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be between 1 and 65535".to_string(),
            ));
        }

        self.storage.validate()?;
        self.health.validate()?;

        // Validate static cluster members
        let mut seen = std::collections::HashSet::new();
        for node in &self.cluster.nodes {
            if node.node_id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "cluster node_id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate cluster node_id: {}",
                    node.node_id
                )));
            }
            if node.host.trim().is_empty() || node.port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid address for cluster node {}",
                    node.node_id
                )));
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file for the given primary storage type
    pub fn create_example_config<P: AsRef<Path>>(path: P, storage: &str) -> Result<(), ConfigError> {
        let storage_type: StorageType = storage.parse()?;

        let config = Config {
            storage: StorageConfig {
                storage_type,
                ..Default::default()
            },
            cluster: ClusterConfig {
                nodes: vec![
                    StaticNodeConfig {
                        node_id: "worker-1".to_string(),
                        host: "10.0.1.10".to_string(),
                        port: 8080,
                        weight: 1,
                        health_check_target: Some("http://10.0.1.10:8080/health".to_string()),
                    },
                    StaticNodeConfig {
                        node_id: "worker-2".to_string(),
                        host: "10.0.1.11".to_string(),
                        port: 8080,
                        weight: 2,
                        health_check_target: Some("tcp://10.0.1.11:8080".to_string()),
                    },
                ],
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{} must be a number, got '{}'", key, value))
    })
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
