//! Ledger configuration.

use std::time::Duration;

use simplebank_common::{LedgerError, Result};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// How long a balance adjustment waits for another transaction's row
    /// lock before failing with `LockTimeout`. Zero means wait forever
    /// (PostgreSQL only).
    pub lock_timeout: Duration,
    /// Log level.
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/simplebank".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(max) = std::env::var("LEDGER_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.max_connections = max;
            }
        }

        if let Ok(ms) = std::env::var("LEDGER_ACQUIRE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.acquire_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(LedgerError::ConfigurationError(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(LedgerError::ConfigurationError(
                "Max connections cannot be 0".to_string(),
            ));
        }

        if self.acquire_timeout.is_zero() {
            return Err(LedgerError::ConfigurationError(
                "Acquire timeout cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}
