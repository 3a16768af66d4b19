use crate::EventStreamClient;
use async_trait::async_trait;
use events::{EventHandler, SessionEvent};
use log::*;
use std::sync::{Arc, Weak};

/// Keeps the event stream in step with the session: connected while
/// authenticated, closed otherwise. Does nothing once the client is dropped.
pub struct StreamSessionHandler {
    client: Weak<EventStreamClient>,
}

impl StreamSessionHandler {
    pub fn new(client: &Arc<EventStreamClient>) -> Self {
        Self {
            client: Arc::downgrade(client),
        }
    }
}

#[async_trait]
impl EventHandler for StreamSessionHandler {
    async fn handle(&self, event: &SessionEvent) {
        let Some(client) = self.client.upgrade() else {
            return;
        };

        match event {
            SessionEvent::AuthChanged {
                is_authenticated: true,
                ..
            } => {
                debug!("Session authenticated, making sure the event stream is up");
                if let Err(err) = client.ensure_connected().await {
                    warn!("Could not start event stream: {err}");
                }
            }
            SessionEvent::AuthChanged { .. } => {
                debug!("Session lost authentication, closing the event stream");
                client.disconnect().await;
            }
            SessionEvent::LoggedOut => {
                debug!("Logged out, closing the event stream");
                client.disconnect().await;
            }
        }
    }
}
