use std::time::Duration;

use landreg_core::identity::ServiceIdentity;
use landreg_engine::{Engine, EngineConfig, EngineError};
use landreg_storage::{SqliteStorage, StorageError};
use tempfile::TempDir;

/// A registry database on disk that several engines (or raw connections)
/// can open at once, for exercising writer isolation.
pub struct SharedDatabase {
    _dir: TempDir,
    path: String,
}

impl SharedDatabase {
    pub fn new() -> Result<Self, std::io::Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("registry.db").to_string_lossy().into_owned();
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self, busy_timeout: Duration) -> EngineConfig {
        EngineConfig {
            database_path: Some(self.path.clone()),
            busy_timeout_ms: busy_timeout.as_millis() as u64,
            ..EngineConfig::default()
        }
    }

    pub fn open_engine(&self, busy_timeout: Duration) -> Result<Engine, EngineError> {
        Engine::open(&self.config(busy_timeout), ServiceIdentity::generate())
    }

    pub fn open_storage(&self) -> Result<SqliteStorage, StorageError> {
        SqliteStorage::open(&self.path)
    }
}
