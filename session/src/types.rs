//! The session data model: host binding, credentials and the durable status record.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, ErrorKind};

/// A host found on the LAN (or entered by hand).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub ip: String,
    pub port: u16,
    pub name: String,
    pub status: String,
    pub message: String,
    pub is_self: bool,
}

impl HostInfo {
    /// A host the user typed in rather than one produced by a discovery scan.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        let ip = ip.into();
        Self {
            name: ip.clone(),
            ip,
            port,
            status: "online".to_string(),
            message: String::new(),
            is_self: false,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// Name and password used to log in. The name doubles as the device id.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub name: String,
    #[serde(serialize_with = "serialize_secret")]
    pub password: SecretString,
}

impl AuthCredentials {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for AuthCredentials {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.password.expose_secret() == other.password.expose_secret()
    }
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Cause category of the most recent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastErrorKind {
    Network,
    Auth,
    Unknown,
}

impl From<&ErrorKind> for LastErrorKind {
    fn from(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::Http(_) => LastErrorKind::Network,
            ErrorKind::Auth(_) | ErrorKind::NotAuthenticated => LastErrorKind::Auth,
            ErrorKind::InvalidResponse | ErrorKind::Storage(_) => LastErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: LastErrorKind,
    pub message: String,
}

impl LastError {
    pub fn new(kind: LastErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&Error> for LastError {
    fn from(err: &Error) -> Self {
        LastError::new(LastErrorKind::from(&err.error_kind), err.to_string())
    }
}

/// The durable session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    #[serde(default)]
    pub is_server_reachable: bool,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub host: Option<HostInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AuthCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

impl AuthStatus {
    /// Enforces the record invariants: no host means neither reachable nor
    /// authenticated, and authentication requires a held token.
    pub(crate) fn normalize(&mut self, has_token: bool) {
        if self.host.is_none() {
            self.is_server_reachable = false;
            self.is_authenticated = false;
        }
        if !has_token {
            self.is_authenticated = false;
        }
    }

    /// A stored session exists when a host is bound and something can prove
    /// who we are to it.
    pub fn has_saved_session(&self, has_token: bool) -> bool {
        self.host.is_some() && (has_token || self.credentials.is_some())
    }
}
