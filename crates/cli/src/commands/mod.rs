pub mod config_cmd;
pub mod init;
pub mod memory;

use memtier_config::{AppConfig, ConfigError};
use memtier_context::MemoryManager;
use memtier_core::entry::AgentScope;
use serde::Serialize;
use std::path::Path;

/// Load the config from `path`, or the default location, with environment
/// overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        return AppConfig::load();
    };
    let mut config = AppConfig::load_from(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// A manager opened on one scope for the duration of a command.
pub struct Session {
    pub manager: MemoryManager,
    pub scope: AgentScope,
    pub json: bool,
}

impl Session {
    pub async fn open(
        config: Option<&Path>,
        scope: &str,
        json: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config(config).map_err(|e| format!("Failed to load config: {e}"))?;
        let manager = MemoryManager::from_config(&config).await?;
        Ok(Self {
            manager,
            scope: AgentScope::new(scope),
            json,
        })
    }

    /// Print `value` as JSON, or run `human` for the plain-text rendering.
    pub fn emit<T: Serialize>(
        &self,
        value: &T,
        human: impl FnOnce(&T),
    ) -> Result<(), Box<dyn std::error::Error>> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}
