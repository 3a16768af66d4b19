//! Key-value persistence for the session record.
//!
//! Values are JSON documents. The session treats the store as best effort:
//! callers decide what a failure means, the store only reports it.

mod file;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Trait for saving, loading and removing JSON values by key.
///
/// Implementations should:
/// - Return `Ok(None)` from `load` for a key that was never saved
/// - Treat removal of a missing key as success
/// - Leave the previous value intact if a `save` fails midway
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn save(&self, key: &str, value: Value) -> Result<(), Error>;

    async fn load(&self, key: &str) -> Result<Option<Value>, Error>;

    async fn remove(&self, key: &str) -> Result<(), Error>;
}
