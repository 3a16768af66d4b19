//! Session lifecycle for the sure-shot client.
//!
//! Owns the host binding, the bearer token and the durable status record,
//! and knows how to restore authentication against a saved host without
//! user interaction.
//!
//! # Modules
//!
//! - [`store`]: key-value persistence behind the [`PersistentStore`] trait
//! - [`schema`]: versioned persisted layout and legacy migration
//! - [`api`]: the host's auth endpoints
//! - [`http`]: client construction and retry policy

pub mod api;
pub mod error;
pub mod http;
pub mod schema;
pub mod state;
pub mod store;
pub mod types;

pub use error::{Error, ErrorKind};
pub use state::{SessionConfig, SessionState};
pub use store::{FileStore, MemoryStore, PersistentStore};
pub use types::{AuthCredentials, AuthStatus, HostInfo, LastError, LastErrorKind};
