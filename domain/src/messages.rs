//! Message history and sending against the bound host.

use std::sync::Arc;

use log::*;
use session::http::HttpClients;
use session::SessionState;
use sse::{ReceivedMessage, SendMessageRequest, SendMessageResponse};

use crate::error::{status_error, Error};

pub struct MessagesClient {
    session: Arc<SessionState>,
    clients: HttpClients,
}

impl MessagesClient {
    pub fn new(session: Arc<SessionState>, clients: HttpClients) -> Self {
        Self { session, clients }
    }

    /// `GET /messages`. Idempotent, so transient failures are retried.
    pub async fn history(&self) -> Result<Vec<ReceivedMessage>, Error> {
        let url = format!("{}/messages", self.session.get_base_url().await?);
        let headers = self.session.get_auth_headers().await;

        let response = self.clients.retrying.get(&url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Failed to load message history: {status}");
            return Err(status_error(&url, status));
        }

        let messages: Vec<ReceivedMessage> = response.json().await?;
        debug!("Loaded {} messages from history", messages.len());
        Ok(messages)
    }

    /// `POST /send`. Never retried.
    pub async fn send(&self, request: &SendMessageRequest) -> Result<SendMessageResponse, Error> {
        let url = format!("{}/send", self.session.get_base_url().await?);
        let headers = self.session.get_auth_headers().await;

        let response = self
            .clients
            .plain
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Failed to send message: {status}");
            return Err(status_error(&url, status));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, ExternalErrorKind, InternalErrorKind};
    use events::EventPublisher;
    use secrecy::SecretString;
    use serde_json::json;
    use session::http::HttpClientBuilder;
    use session::{AuthStatus, HostInfo, MemoryStore, SessionConfig};
    use std::time::Duration;

    async fn bound_client(server: &mockito::ServerGuard) -> MessagesClient {
        let address = server.socket_address();
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            reqwest::Client::new(),
            SessionConfig::default(),
            EventPublisher::new(),
        ));
        session
            .sync_from(
                Some(SecretString::new("T1".to_string())),
                AuthStatus {
                    is_server_reachable: true,
                    is_authenticated: true,
                    host: Some(HostInfo::new(address.ip().to_string(), address.port())),
                    credentials: None,
                    last_error: None,
                },
            )
            .await;

        let clients = HttpClientBuilder::new()
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(5))
            .build()
            .unwrap();
        MessagesClient::new(session, clients)
    }

    fn sample() -> serde_json::Value {
        json!({
            "from": "192.168.1.20",
            "from_name": "phone",
            "message": "hi",
            "message_type": "text",
            "timestamp": "2024-05-01T10:00:00Z",
            "is_self": false,
            "attachments": [{
                "id": "a1", "filename": "cat.png", "mime_type": "image/png",
                "size": 3, "data": "AAAA", "thumbnail": null
            }]
        })
    }

    #[tokio::test]
    async fn test_history_sends_bearer_and_parses_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/messages")
            .match_header("authorization", "Bearer T1")
            .with_status(200)
            .with_body(json!([sample()]).to_string())
            .expect(1)
            .create_async()
            .await;

        let messages = bound_client(&server).await.history().await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from_name, "phone");
        assert_eq!(messages[0].attachments[0].filename, "cat.png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_history_retries_transient_failures() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/messages")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = bound_client(&server).await.history().await.unwrap_err();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::Network)
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_posts_body_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(json!({
                "message": "hello",
                "message_type": "text",
                "attachments": [],
                "from_name": "laptop",
                "from_ip": "10.0.0.3"
            })))
            .with_status(200)
            .with_body(
                json!({"success": true, "message": "sent", "timestamp": "2024-05-01T10:00:01Z"})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let response = bound_client(&server)
            .await
            .send(&SendMessageRequest::text("hello", "laptop", "10.0.0.3"))
            .await
            .unwrap();

        assert!(response.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let result = bound_client(&server)
            .await
            .send(&SendMessageRequest::text("hello", "laptop", "10.0.0.3"))
            .await;

        assert!(result.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_history_without_host_is_unauthenticated() {
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            reqwest::Client::new(),
            SessionConfig::default(),
            EventPublisher::new(),
        ));
        let client = MessagesClient::new(session, HttpClientBuilder::new().build().unwrap());

        let err = client.history().await.unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Unauthenticated)
        );
    }
}
