//! Runtime configuration from the environment
//!
//! Values come from process env, after `.env` has been loaded. Anything missing or
//! unparsable falls back to its default.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::billing::DEFAULT_WATCHDOG_INTERVAL;
use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore, SqliteStore, StorageError};

const DEFAULT_UPGRADE_URL: &str = "tutor://upgrade";
const SQLITE_FILENAME: &str = "state.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Json,
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub storage: StorageBackend,
    pub watchdog_interval: Duration,
    pub upgrade_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            storage: StorageBackend::Json,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            upgrade_url: DEFAULT_UPGRADE_URL.to_string(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("TUTOR_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("TUTOR_STORAGE") {
            match raw.parse() {
                Ok(backend) => config.storage = backend,
                Err(e) => warn!("{}; using {:?}", e, config.storage),
            }
        }

        if let Some(raw) = lookup("TUTOR_WATCHDOG_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs >= 1 => config.watchdog_interval = Duration::from_secs(secs),
                _ => warn!(
                    value = raw,
                    "Invalid TUTOR_WATCHDOG_SECS; using {}s",
                    config.watchdog_interval.as_secs()
                ),
            }
        }

        if let Some(url) = lookup("TUTOR_UPGRADE_URL").filter(|u| !u.trim().is_empty()) {
            config.upgrade_url = url;
        }

        config
    }

    /// Default data directory (~/.config/vip-tutor/)
    fn default_data_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vip-tutor")
    }

    /// Open the configured store
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>, StorageError> {
        Ok(match self.storage {
            StorageBackend::Json => Arc::new(JsonFileStore::open(&self.data_dir)?),
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(self.data_dir.join(SQLITE_FILENAME))?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }
}
