//! The session authority: which host we are bound to, whether we hold a valid
//! token for it, and how to get one back when we don't.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use events::{EventPublisher, SessionEvent};
use log::*;
use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::api;
use crate::error::{not_authenticated, Error};
use crate::schema::{self, PersistedSession, STORAGE_KEY};
use crate::store::PersistentStore;
use crate::types::{AuthCredentials, AuthStatus, HostInfo, LastError, LastErrorKind};

/// Per-call timeouts for the auth endpoints.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub login_timeout: Duration,
    pub ping_timeout: Duration,
    pub verify_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(3),
            verify_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Default)]
struct Inner {
    token: Option<SecretString>,
    status: AuthStatus,
}

/// Shared through `Arc`. Every mutation normalizes the record, persists it
/// (unless persistence is off) and publishes [`SessionEvent::AuthChanged`].
///
/// The record lock is never held across an `.await`; overlapping operations
/// are last-write-wins.
pub struct SessionState {
    store: Arc<dyn PersistentStore>,
    client: Client,
    config: SessionConfig,
    publisher: EventPublisher,
    inner: RwLock<Inner>,
    hydrated: OnceCell<()>,
    persist_enabled: AtomicBool,
}

impl SessionState {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        client: Client,
        config: SessionConfig,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            client,
            config,
            publisher,
            inner: RwLock::new(Inner::default()),
            hydrated: OnceCell::new(),
            persist_enabled: AtomicBool::new(true),
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Loads the persisted record the first time it is called; later calls return immediately.
    pub async fn hydrate(&self) {
        self.hydrated.get_or_init(|| self.load_persisted()).await;
    }

    async fn load_persisted(&self) {
        let loaded = match self.store.load(STORAGE_KEY).await {
            Ok(Some(value)) => schema::decode(value).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };

        match loaded {
            Ok(Some(persisted)) => {
                let mut inner = self.write();
                inner.token = persisted.token;
                inner.status = persisted.auth_status;
                // A restored binding has not been re-checked yet
                inner.status.is_authenticated = false;
                inner.status.is_server_reachable = false;
                let has_token = inner.token.is_some();
                inner.status.normalize(has_token);
                info!(
                    "Restored saved session (host bound: {})",
                    inner.status.host.is_some()
                );
            }
            Ok(None) => debug!("No saved session"),
            Err(err) => {
                warn!("Discarding unreadable saved session: {err}");
                if let Err(err) = self.store.remove(STORAGE_KEY).await {
                    warn!("Failed to erase unreadable saved session: {err}");
                }
            }
        }
    }

    /// Exchanges credentials for a token. On failure the host and credentials
    /// stay bound so a later silent re-login can retry.
    pub async fn login(&self, host: HostInfo, credentials: AuthCredentials) -> bool {
        self.hydrate().await;
        info!("Logging in to {}", host.base_url());

        let result =
            api::request_token(&self.client, &host, &credentials, self.config.login_timeout).await;

        match result {
            Ok(token) => {
                info!("Logged in to {}", host.base_url());
                self.apply(move |inner| {
                    inner.token = Some(token);
                    inner.status = AuthStatus {
                        is_server_reachable: true,
                        is_authenticated: true,
                        host: Some(host),
                        credentials: Some(credentials),
                        last_error: None,
                    };
                })
                .await;
                true
            }
            Err(err) => {
                warn!("Login to {} failed: {err}", host.base_url());
                let reachable = !err.is_transport();
                let last_error = LastError::from(&err);
                self.apply(move |inner| {
                    inner.token = None;
                    inner.status = AuthStatus {
                        is_server_reachable: reachable,
                        is_authenticated: false,
                        host: Some(host),
                        credentials: Some(credentials),
                        last_error: Some(last_error),
                    };
                })
                .await;
                false
            }
        }
    }

    /// Re-checks the held token against the bound host.
    pub async fn verify(&self) -> bool {
        self.hydrate().await;

        let (host, token) = {
            let inner = self.read();
            match (inner.status.host.clone(), inner.token.clone()) {
                (Some(host), Some(token)) => (host, token),
                _ => return false,
            }
        };

        self.verify_against(&host, &token).await.unwrap_or(false)
    }

    /// `Some(true)` when accepted, `Some(false)` when the host could not be
    /// reached, `None` when the host rejected the token (already dropped).
    async fn verify_against(&self, host: &HostInfo, token: &SecretString) -> Option<bool> {
        match api::verify_token(&self.client, host, token, self.config.verify_timeout).await {
            Ok(()) => {
                debug!("Token accepted by {}", host.base_url());
                self.apply(|inner| {
                    inner.status.is_server_reachable = true;
                    inner.status.is_authenticated = true;
                    inner.status.last_error = None;
                })
                .await;
                Some(true)
            }
            Err(err) if err.is_transport() => {
                warn!("Could not verify token with {}: {err}", host.base_url());
                self.mark_unreachable(LastError::new(LastErrorKind::Network, err.to_string()))
                    .await;
                Some(false)
            }
            Err(err) => {
                info!("Token rejected by {}", host.base_url());
                let last_error = LastError::from(&err);
                self.apply(move |inner| {
                    inner.token = None;
                    inner.status.is_server_reachable = true;
                    inner.status.is_authenticated = false;
                    inner.status.last_error = Some(last_error);
                })
                .await;
                None
            }
        }
    }

    /// Restores authentication against the saved host: liveness first, then
    /// the held token, then a silent re-login with retained credentials.
    pub async fn try_reauthenticate_with_saved_host(&self) -> bool {
        self.hydrate().await;

        let (host, token, credentials) = {
            let inner = self.read();
            (
                inner.status.host.clone(),
                inner.token.clone(),
                inner.status.credentials.clone(),
            )
        };

        let Some(host) = host else {
            debug!("No saved host to re-authenticate with");
            self.apply(|inner| inner.status.is_authenticated = false).await;
            return false;
        };

        if let Err(err) = api::ping(&self.client, &host, self.config.ping_timeout).await {
            warn!("Saved host {} is unreachable: {err}", host.base_url());
            self.mark_unreachable(LastError::new(LastErrorKind::Network, err.to_string()))
                .await;
            return false;
        }

        let mut verify_unreachable = false;
        if let Some(token) = token {
            match self.verify_against(&host, &token).await {
                Some(true) => return true,
                Some(false) => verify_unreachable = true,
                None => {}
            }
            debug!("Falling back to saved credentials");
        }

        match credentials {
            Some(credentials) => {
                info!("Silently logging in to {} again", host.base_url());
                self.login(host, credentials).await
            }
            // Verify already recorded the network failure
            None if verify_unreachable => false,
            None => {
                self.apply(|inner| {
                    inner.status.is_server_reachable = true;
                    inner.status.is_authenticated = false;
                    inner.status.last_error =
                        Some(LastError::new(LastErrorKind::Auth, "No saved credentials"));
                })
                .await;
                false
            }
        }
    }

    /// Forgets everything, including the persisted copy.
    pub async fn logout(&self) {
        self.hydrate().await;
        info!("Logging out");

        let snapshot = self.commit(|inner| *inner = Inner::default());
        self.persist(&snapshot).await;
        self.publisher.publish(SessionEvent::LoggedOut).await;
    }

    pub async fn get_auth_headers(&self) -> HeaderMap {
        self.hydrate().await;
        api::auth_headers(self.read().token.as_ref())
    }

    pub async fn get_base_url(&self) -> Result<String, Error> {
        self.hydrate().await;
        self.read()
            .status
            .host
            .as_ref()
            .map(HostInfo::base_url)
            .ok_or_else(not_authenticated)
    }

    /// Turning persistence off erases the stored copy and leaves memory alone.
    pub async fn set_persist_enabled(&self, enabled: bool) {
        self.hydrate().await;
        self.persist_enabled.store(enabled, Ordering::SeqCst);

        if enabled {
            let snapshot = self.snapshot();
            self.persist(&snapshot).await;
        } else if let Err(err) = self.store.remove(STORAGE_KEY).await {
            warn!("Failed to erase saved session: {err}");
        }
    }

    pub fn persist_enabled(&self) -> bool {
        self.persist_enabled.load(Ordering::SeqCst)
    }

    /// Adopts a record published elsewhere. Persists it but does not publish,
    /// so mirrored copies never echo each other.
    pub async fn sync_from(&self, token: Option<SecretString>, status: AuthStatus) {
        self.hydrate().await;
        let snapshot = self.commit(move |inner| {
            inner.token = token;
            inner.status = status;
        });
        self.persist(&snapshot).await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().status.is_authenticated
    }

    pub fn is_server_reachable(&self) -> bool {
        self.read().status.is_server_reachable
    }

    pub fn has_saved_session(&self) -> bool {
        let inner = self.read();
        inner.status.has_saved_session(inner.token.is_some())
    }

    pub fn status(&self) -> AuthStatus {
        self.read().status.clone()
    }

    pub fn host(&self) -> Option<HostInfo> {
        self.read().status.host.clone()
    }

    pub fn token(&self) -> Option<SecretString> {
        self.read().token.clone()
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.read().status.last_error.clone()
    }

    async fn mark_unreachable(&self, last_error: LastError) {
        self.apply(move |inner| {
            inner.status.is_server_reachable = false;
            inner.status.is_authenticated = false;
            inner.status.last_error = Some(last_error);
        })
        .await;
    }

    async fn apply(&self, mutate: impl FnOnce(&mut Inner)) {
        let snapshot = self.commit(mutate);
        self.persist(&snapshot).await;
        self.notify(snapshot).await;
    }

    fn commit(&self, mutate: impl FnOnce(&mut Inner)) -> PersistedSession {
        let mut inner = self.write();
        mutate(&mut inner);
        let has_token = inner.token.is_some();
        inner.status.normalize(has_token);
        PersistedSession {
            token: inner.token.clone(),
            auth_status: inner.status.clone(),
        }
    }

    fn snapshot(&self) -> PersistedSession {
        let inner = self.read();
        PersistedSession {
            token: inner.token.clone(),
            auth_status: inner.status.clone(),
        }
    }

    async fn persist(&self, snapshot: &PersistedSession) {
        if !self.persist_enabled() {
            return;
        }

        let result = if snapshot.auth_status.host.is_none() {
            self.store.remove(STORAGE_KEY).await
        } else {
            match schema::encode(snapshot) {
                Ok(value) => self.store.save(STORAGE_KEY, value).await,
                Err(err) => Err(err),
            }
        };

        if let Err(err) = result {
            warn!("Failed to persist session: {err}");
        }
    }

    async fn notify(&self, snapshot: PersistedSession) {
        let status = serde_json::to_value(&snapshot.auth_status).unwrap_or_else(|err| {
            warn!("Failed to serialize session record for subscribers: {err}");
            Value::Null
        });

        self.publisher
            .publish(SessionEvent::AuthChanged {
                is_authenticated: snapshot.auth_status.is_authenticated,
                is_server_reachable: snapshot.auth_status.is_server_reachable,
                token: snapshot.token,
                status,
            })
            .await;
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
