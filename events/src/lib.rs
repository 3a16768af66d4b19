//! Session change notifications for the sure-shot client.
//!
//! This crate provides the publish/subscribe channel that lets every surface
//! of the client (redirect controller, event stream, other contexts sharing
//! the same persisted session) react to session mutations without polling.
//!
//! # Architecture
//!
//! - **SessionEvent**: Enum describing every session mutation
//! - **EventHandler**: Trait for implementing subscribers
//! - **EventPublisher**: Fans events out to registered handlers in order
//!
//! This crate has no dependencies on internal crates, so the session record is
//! carried as a JSON value. Subscribers that need the typed record decode it
//! with `session::AuthStatus`.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// Events emitted by the session after each mutation.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session record changed (login, verify or re-authentication).
    AuthChanged {
        /// Whether the last verify/login against the bound host succeeded.
        is_authenticated: bool,
        /// Last known liveness of the bound host.
        is_server_reachable: bool,
        /// Bearer token currently held, if any. Needed by other contexts to
        /// mirror the session without logging in again.
        token: Option<SecretString>,
        /// Complete serialized session record (camelCase persisted layout).
        status: Value,
    },
    /// The session was cleared by an explicit logout.
    LoggedOut,
}

impl SessionEvent {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            SessionEvent::AuthChanged {
                is_authenticated: true,
                ..
            }
        )
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &SessionEvent);
}

/// Delivers session events to every subscribed handler, in subscription order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_handler(self, handler: Arc<dyn EventHandler>) -> Self {
        self.subscribe(handler);
        self
    }

    /// Adds a handler after construction. Components that themselves depend on
    /// the session subscribe this way once they exist.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn publish(&self, event: SessionEvent) {
        // Snapshot so handlers may subscribe further handlers while being notified
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
