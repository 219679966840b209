use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::LedgerError;

pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub default_list_limit: u32,
    pub export_limit: u32,
    pub include_global_genesis: bool,
    pub auto_initialize: bool,
    pub max_append_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ledger.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
            default_list_limit: 100,
            export_limit: 10_000,
            include_global_genesis: true,
            auto_initialize: false,
            max_append_retries: 5,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from `ledger.toml` (if present) and `LEDGER_*`
    /// environment variables
    pub fn load() -> Result<Self, LedgerError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE), false)
    }

    /// Load configuration from an explicit file, still honoring environment
    /// overrides
    pub fn load_from(path: &Path, required: bool) -> Result<Self, LedgerError> {
        let defaults = Self::default();

        let settings = Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("max_connections", defaults.max_connections)?
            .set_default("busy_timeout_ms", defaults.busy_timeout_ms)?
            .set_default("default_list_limit", defaults.default_list_limit)?
            .set_default("export_limit", defaults.export_limit)?
            .set_default("include_global_genesis", defaults.include_global_genesis)?
            .set_default("auto_initialize", defaults.auto_initialize)?
            .set_default("max_append_retries", defaults.max_append_retries)?
            .add_source(File::from(path).required(required))
            .add_source(Environment::with_prefix("LEDGER").try_parsing(true))
            .build()?;

        let config: LedgerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.database_url.trim().is_empty() {
            return Err(LedgerError::ConfigError(
                "database_url must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(LedgerError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_append_retries == 0 {
            return Err(LedgerError::ConfigError(
                "max_append_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
