//! 应用运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 允许的最小端口（不含），低端口保留给系统服务。
pub const MIN_PORT_EXCLUSIVE: u16 = 1024;

/// 批量聚合参数。
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
    pub poll_interval: Duration,
    pub max_batch_retention: Duration,
    pub queue_capacity: usize,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ditto_addr: String,
    pub ditto_port: u16,
    pub ditto_user: String,
    pub ditto_password: String,
    pub ditto_fields: String,
    pub influx_addr: String,
    pub influx_port: u16,
    pub influx_database: String,
    pub influx_user: String,
    pub influx_password: String,
    pub batch: BatchSettings,
    pub cache_capacity: usize,
    pub dry_run: bool,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let ditto_addr = read_string_with_default("BRIDGE_DITTO_ADDR", "10.0.13.32");
        let ditto_port = read_port_with_default("BRIDGE_DITTO_PORT", 30525)?;
        let ditto_user = read_string_with_default("BRIDGE_DITTO_USER", "ditto");
        let ditto_password = read_string_with_default("BRIDGE_DITTO_PASSWORD", "ditto");
        let ditto_fields =
            read_string_with_default("BRIDGE_DITTO_FIELDS", "thingId,features,_modified");
        let influx_addr = read_string_with_default("BRIDGE_INFLUX_ADDR", "10.152.183.48");
        let influx_port = read_port_with_default("BRIDGE_INFLUX_PORT", 8086)?;
        let influx_database = read_string_with_default("BRIDGE_INFLUX_DB", "bosch");
        let influx_user = read_string_with_default("BRIDGE_INFLUX_USER", "root");
        let influx_password = read_string_with_default("BRIDGE_INFLUX_PASSWORD", "root");

        let batch = BatchSettings {
            max_batch_size: read_positive_usize_with_default("BRIDGE_MAX_BATCH_SIZE", 100)?,
            max_batch_wait: read_millis_with_default("BRIDGE_MAX_BATCH_WAIT_MS", 2_000)?,
            poll_interval: read_millis_with_default("BRIDGE_POLL_INTERVAL_MS", 1_000)?,
            max_batch_retention: read_millis_with_default(
                "BRIDGE_MAX_BATCH_RETENTION_MS",
                60_000,
            )?,
            queue_capacity: read_positive_usize_with_default("BRIDGE_QUEUE_CAPACITY", 10_000)?,
        };
        let cache_capacity = read_positive_usize_with_default("BRIDGE_CACHE_CAPACITY", 30)?;
        let dry_run = read_bool_with_default("BRIDGE_DRY_RUN", false);

        Ok(Self {
            ditto_addr,
            ditto_port,
            ditto_user,
            ditto_password,
            ditto_fields,
            influx_addr,
            influx_port,
            influx_database,
            influx_user,
            influx_password,
            batch,
            cache_capacity,
            dry_run,
        })
    }
}

/// 校验端口：必须大于 1024。
pub fn check_port(key: &str, raw: &str) -> Result<u16, ConfigError> {
    let port = raw
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), raw.to_string()))?;
    if port <= MIN_PORT_EXCLUSIVE {
        return Err(ConfigError::Invalid(key.to_string(), raw.to_string()));
    }
    Ok(port)
}

fn read_string_with_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn read_port_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    match env::var(key) {
        Ok(value) => check_port(key, &value),
        Err(_) => Ok(default),
    }
}

fn read_positive_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<usize>() {
        Ok(parsed) if parsed >= 1 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_millis_with_default(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(Duration::from_millis(default_ms)),
    };
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
