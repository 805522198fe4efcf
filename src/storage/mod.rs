//! Key-value persistence for session flags.
//!
//! Holds the few values that outlive a page session: the enabled flag, the
//! pause-until timestamp, the first-run flag and the kudos counter.
//!
//! - `JsonFileStore`: one JSON object on disk, written atomically
//! - `MemoryStore`: process-local map for ephemeral runs and tests

pub mod local;
pub mod memory;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::Result;

// Re-export for convenience
pub use local::JsonFileStore;
pub use memory::MemoryStore;

/// Trait for key-value storage backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store a value under `key`, replacing any previous value.
    async fn save_value(&self, key: &str, value: Value) -> Result<()>;

    /// Read the raw value under `key`.
    async fn load_value(&self, key: &str) -> Result<Option<Value>>;

    /// Delete `key`. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

impl<'a> dyn KeyValueStore + 'a {
    /// Serialize and store a value.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.save_value(key, value).await
    }

    /// Load a value, falling back to `default` when it is missing,
    /// unreadable or of the wrong shape.
    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.load_value(key).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                log::warn!("Stored value for '{}' is invalid: {}. Using default.", key, e);
                default
            }),
            Ok(None) => default,
            Err(e) => {
                log::warn!("Failed to load '{}': {}. Using default.", key, e);
                default
            }
        }
    }
}
