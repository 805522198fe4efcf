//! Local filesystem storage implementation.
//!
//! Keeps every key in a single JSON object:
//!
//! ```text
//! {root}/
//! ├── config.toml    # Engine configuration
//! └── state.json     # {"strava_auto_kudos_enabled": true, ...}
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::KeyValueStore;

/// JSON file storage backend.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by the given file. The file is created on the
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read the whole object, `None` if the file doesn't exist.
    async fn read_map(&self) -> Result<Option<Map<String, Value>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };

        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(Some(map)),
            other => Err(AppError::storage(format!(
                "{} holds {} instead of an object",
                self.path.display(),
                kind_of(&other)
            ))),
        }
    }

    /// Read the object for modification. A corrupt file is replaced.
    async fn read_map_for_update(&self) -> Result<Map<String, Value>> {
        match self.read_map().await {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(AppError::Io(e)) => Err(AppError::Io(e)),
            Err(e) => {
                log::warn!(
                    "Discarding unreadable state file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(Map::new())
            }
        }
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn save_value(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map_for_update().await?;
        map.insert(key.to_string(), value);
        self.write_map(&map).await?;
        log::debug!("Saved '{}' to {}", key, self.path.display());
        Ok(())
    }

    async fn load_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_map().await?.and_then(|mut map| map.remove(key)))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map_for_update().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}
