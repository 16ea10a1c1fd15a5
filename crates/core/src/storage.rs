use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use crate::error::{PromptMasterError, Result};

pub const SETTINGS_KEY: &str = "prompt-master-ai-settings";
pub const RECORDS_KEY: &str = "prompt-master-records";
pub const SESSION_API_KEY: &str = "prompt-master-session-api-key";
pub const ACTIVE_VIEW_KEY: &str = "prompt-master-active-view";
pub const LAST_OUTPUT_KEY: &str = "prompt-master-last-output";

/// Key-value persistence for JSON documents.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

pub type SharedStorage = Arc<dyn Storage>;

/// Durable data directory (settings, records).
pub fn get_root_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("prompt-master")
}

/// Session-scoped directory. Cleared by the OS on logout/reboot where a
/// runtime dir exists.
pub fn get_session_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("prompt-master")
}

/// One `<key>.json` file per key under a root directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(value)?;
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PromptMasterError::StorageFailed {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;
        fs::write(&path, json)
            .await
            .map_err(|e| PromptMasterError::StorageFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-lifetime storage, used for tests and for the proxy's ephemeral state.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| PromptMasterError::StoragePoisoned)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// Reads a key, treating unreadable or malformed data as absent.
pub async fn read_json_or_none(storage: &dyn Storage, key: &str) -> Option<Value> {
    match storage.get(key).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding unreadable stored value");
            None
        }
    }
}
