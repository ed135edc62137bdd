use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::audit::AUDIT_CATEGORY;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// SQLite file; in-memory database when absent.
    pub database_path: Option<String>,
    /// How long a writer waits for another writer's transaction.
    pub busy_timeout_ms: u64,
    pub audit_enabled: bool,
    pub audit_category: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: 5000,
            audit_enabled: true,
            audit_category: AUDIT_CATEGORY.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
