//! Error types for the `session` crate.
//!
//! Follows the same pattern as the other layers: a root Error struct holding
//! an error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the session crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the session crate.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// No host is bound, so there is nothing to talk to.
    NotAuthenticated,
    Auth(AuthErrorKind),
    Http(HttpErrorKind),
    /// The host answered 2xx with a body we could not understand.
    InvalidResponse,
    Storage(StorageErrorKind),
}

/// The host refused the credentials or the token.
#[derive(Debug, PartialEq)]
pub enum AuthErrorKind {
    /// 401 on login.
    InvalidCredentials,
    /// 403 on login.
    DeviceNotAuthorized,
    /// Any other refusal at login time (other status, `success: false`, no token).
    Rejected,
    /// `/auth/verify` did not accept the held token.
    InvalidToken,
}

/// Errors from the transport itself.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    Network,
    Timeout,
    /// Non-success status on a call without a more specific meaning (e.g. `/ping`).
    Status(u16),
}

/// Errors from the persistent store.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    Io,
    Serialization,
    UnsupportedVersion(u64),
}

impl Error {
    /// Host-facing errors are transport errors; the session marks the host unreachable.
    pub fn is_transport(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Http(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::NotAuthenticated => write!(f, "Not authenticated"),
            ErrorKind::Auth(AuthErrorKind::InvalidCredentials) => write!(f, "Invalid password"),
            ErrorKind::Auth(AuthErrorKind::DeviceNotAuthorized) => {
                write!(f, "Device not authorized")
            }
            ErrorKind::Auth(AuthErrorKind::Rejected) => write!(f, "Login failed"),
            ErrorKind::Auth(AuthErrorKind::InvalidToken) => write!(f, "Token validation failed"),
            ErrorKind::Http(HttpErrorKind::Status(code)) => {
                write!(f, "Host answered with status {code}")
            }
            ErrorKind::Http(HttpErrorKind::Timeout) => write!(f, "Host did not answer in time"),
            ErrorKind::Http(kind) => match &self.source {
                Some(source) => write!(f, "HTTP error ({kind:?}): {source}"),
                None => write!(f, "HTTP error: {kind:?}"),
            },
            ErrorKind::InvalidResponse => write!(f, "Host sent a malformed response"),
            ErrorKind::Storage(kind) => write!(f, "Storage error: {kind:?}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_timeout() {
            ErrorKind::Http(HttpErrorKind::Timeout)
        } else if err.is_decode() {
            ErrorKind::InvalidResponse
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            other => Error {
                source: Some(other.to_string().into()),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Io),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Serialization),
        }
    }
}

/// Helper function to create auth errors.
pub fn auth_error(kind: AuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Auth(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function for calls made while no host is bound.
pub fn not_authenticated() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::NotAuthenticated,
    }
}

/// Helper function for non-success statuses without a more specific meaning.
pub fn status_error(status: reqwest::StatusCode) -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Http(HttpErrorKind::Status(status.as_u16())),
    }
}
