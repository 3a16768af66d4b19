use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::PersistentStore;
use crate::error::Error;

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn save(&self, key: &str, value: Value) -> Result<(), Error> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>, Error> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}
