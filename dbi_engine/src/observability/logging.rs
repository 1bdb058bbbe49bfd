use crate::error::DbiError;
use log::Level;

/// Formats driver events as one line with `key=value` metadata.
pub struct StructuredLogger {
    enabled: bool,
}

fn with_metadata(mut message: String, metadata: &[(&str, String)]) -> String {
    for (key, value) in metadata {
        message.push_str(&format!(", {}={}", key, value));
    }
    message
}

impl StructuredLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn format_statement(sql: &str, metadata: &[(&str, String)]) -> String {
        with_metadata(format!("Statement: {}", sql), metadata)
    }

    pub fn format_error(error: &DbiError, metadata: &[(&str, String)]) -> String {
        with_metadata(
            format!("Error: [{}] {}", error.sqlstate_str(), error.message()),
            metadata,
        )
    }

    pub fn log_statement(&self, level: Level, sql: &str, metadata: &[(&str, String)]) {
        if !self.enabled {
            return;
        }
        log::log!(level, "{}", Self::format_statement(sql, metadata));
    }

    /// `target` must not contain credentials.
    pub fn log_connection(&self, level: Level, target: &str, action: &str) {
        if !self.enabled {
            return;
        }
        log::log!(level, "Connection {}: {}", action, target);
    }

    pub fn log_error(&self, error: &DbiError, metadata: &[(&str, String)]) {
        if !self.enabled {
            return;
        }
        log::error!("{}", Self::format_error(error, metadata));
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(true)
    }
}
