//! # Bus Configuration
//!
//! `BusConfig` has one struct field per configuration option. Loaded from
//! an optional TOML file layered under process environment variables of
//! the same name, via the `config` crate.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditingConfig {
    pub log_console_enabled: bool,
    pub log_details: bool,
    pub log_min_level: String,
    pub log_uses_json: bool,
}

impl Default for AuditingConfig {
    fn default() -> Self {
        Self {
            log_console_enabled: true,
            log_details: false,
            log_min_level: "info".to_string(),
            log_uses_json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageExchangeConfig {
    pub queue_prefix: String,
    pub security_hash_enabled: bool,
    pub security_hash_key: String,
    pub trace_log_enabled: bool,
    pub trace_repository: String,
    pub trace_expiration_time: i64,
}

impl Default for MessageExchangeConfig {
    fn default() -> Self {
        Self {
            queue_prefix: String::new(),
            security_hash_enabled: false,
            security_hash_key: String::new(),
            trace_log_enabled: true,
            trace_repository: "trace:repository".to_string(),
            trace_expiration_time: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub redis_auth_key: Option<String>,
    pub redis_user: Option<String>,
    pub retry_max_attempts: u32,
    pub retry_max_interval: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_auth_key: None,
            redis_user: None,
            retry_max_attempts: 5,
            retry_max_interval: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceExecutionConfig {
    /// Per-call deadline in milliseconds. Named `timeout`, not `timeout_ms`,
    /// so `SERVICE_EXECUTION__TIMEOUT` lands on this field under the
    /// double-underscore section separator `load` uses.
    pub timeout: u64,
}

impl Default for ServiceExecutionConfig {
    fn default() -> Self {
        Self { timeout: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceHealthConfig {
    pub check_address: String,
    pub check_interval: u64,
    pub check_timeout: u64,
}

impl Default for ServiceHealthConfig {
    fn default() -> Self {
        Self {
            check_address: "health:".to_string(),
            check_interval: 30,
            check_timeout: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRegistryConfig {
    pub address: String,
}

impl Default for ServiceRegistryConfig {
    fn default() -> Self {
        Self {
            address: "registry:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub auditing: AuditingConfig,
    pub message_exchange: MessageExchangeConfig,
    pub memory_cache: MemoryCacheConfig,
    pub service_execution: ServiceExecutionConfig,
    pub service_health: ServiceHealthConfig,
    pub service_registry: ServiceRegistryConfig,
}

impl BusConfig {
    /// Load configuration from an optional TOML file at `path`, layered
    /// under environment variables of the corresponding name.
    ///
    /// Section and field names already contain underscores
    /// (`memory_cache.redis_port`), so a single `_` can't double as the
    /// section/field separator without ambiguity — `config` would split
    /// `MEMORY_CACHE_REDIS_PORT` into four segments instead of two. `__`
    /// is used as the separator instead, so the recognized env vars are
    /// e.g. `MEMORY_CACHE__REDIS_PORT`, `SERVICE_EXECUTION__TIMEOUT`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}
