use crate::engine::transaction::IsolationLevel;
use crate::error::{DbiError, Result};
use crate::security::SecureBuffer;
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_INITIAL_VALUE_CAPACITY: usize = 200;
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 100;
pub const DEFAULT_ODBC_DRIVER: &str = "MySQL ODBC 8.0 Unicode Driver";

/// Which fetch discipline a connection's statements use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// One value at a time through NextValue
    #[default]
    Pull,
    /// NextRow then ColumnLength/ColumnValue into host buffers
    Bound,
}

impl FetchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" => Some(Self::Pull),
            "bound" => Some(Self::Bound),
            _ => None,
        }
    }
}

/// Resolved driver configuration.
///
/// The host resolves its own configuration syntax; this only holds values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub module: String,
    pub database: String,
    pub user: String,
    pub password: SecureBuffer,
    pub host: Option<String>,
    /// 0 selects the client library's default port.
    pub port: u16,
    pub unix_socket: Option<String>,
    pub embedded: bool,
    pub dsn: Option<String>,
    pub odbc_driver: String,
    pub connect_timeout_secs: Option<u32>,
    pub default_isolation: IsolationLevel,
    pub fetch_mode: FetchMode,
    pub initial_value_capacity: usize,
    pub statement_cache_size: usize,
    pub time_zone: Option<String>,
    pub strict_mode: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            module: String::new(),
            database: "mysql".to_string(),
            user: "root".to_string(),
            password: SecureBuffer::default(),
            host: None,
            port: 0,
            unix_socket: None,
            embedded: false,
            dsn: None,
            odbc_driver: DEFAULT_ODBC_DRIVER.to_string(),
            connect_timeout_secs: None,
            default_isolation: IsolationLevel::RepeatableRead,
            fetch_mode: FetchMode::Pull,
            initial_value_capacity: DEFAULT_INITIAL_VALUE_CAPACITY,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            time_zone: Some("+00:00".to_string()),
            strict_mode: true,
        }
    }
}

impl DriverConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DbiError::ValidationError(format!("Invalid driver config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from already-resolved string values. Unknown keys are
    /// ignored; missing keys keep their defaults.
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in values {
            match key.as_str() {
                "module" => config.module = value.clone(),
                "database" => config.database = value.clone(),
                "user" => config.user = value.clone(),
                "password" => config.password = SecureBuffer::from(value.as_str()),
                "host" => config.host = non_empty(value),
                "port" => config.port = parse_number(key, value)?,
                "unix_socket" => config.unix_socket = non_empty(value),
                "embedded" => config.embedded = parse_bool(key, value)?,
                "dsn" => config.dsn = non_empty(value),
                "odbc_driver" => config.odbc_driver = value.clone(),
                "connect_timeout_secs" => {
                    config.connect_timeout_secs = Some(parse_number(key, value)?)
                }
                "default_isolation" => {
                    config.default_isolation = IsolationLevel::parse(value).ok_or_else(|| {
                        DbiError::ValidationError(format!("Unknown isolation level: {}", value))
                    })?
                }
                "fetch_mode" => {
                    config.fetch_mode = FetchMode::parse(value).ok_or_else(|| {
                        DbiError::ValidationError(format!("Unknown fetch mode: {}", value))
                    })?
                }
                "initial_value_capacity" => {
                    config.initial_value_capacity = parse_number(key, value)?
                }
                "statement_cache_size" => config.statement_cache_size = parse_number(key, value)?,
                "time_zone" => config.time_zone = non_empty(value),
                "strict_mode" => config.strict_mode = parse_bool(key, value)?,
                _ => log::debug!("ignoring unknown driver config key {}", key),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_value_capacity == 0 {
            return Err(DbiError::ValidationError(
                "initial_value_capacity must be greater than 0".to_string(),
            ));
        }
        if self.statement_cache_size == 0 {
            return Err(DbiError::ValidationError(
                "statement_cache_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DbiError::ValidationError(format!("{} must be a number, got {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DbiError::ValidationError(format!(
            "{} must be a boolean, got {}",
            key, value
        ))),
    }
}
