//! Error types for the `domain` layer.
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure with
/// `domain::error::Error` as the root type holding a tree of `error_kind` enums.
/// Errors from `session` and `sse` are translated here so the binary only ever
/// deals with domain error kinds.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    /// No host bound or no valid session.
    Unauthenticated,
    Storage,
    Other(String),
}

#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Network,
    /// The host refused our credentials or token.
    Rejected,
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Domain Error ({:?}): {source}", self.error_kind),
            None => write!(f, "Domain Error: {:?}", self.error_kind),
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

impl From<session::Error> for Error {
    fn from(err: session::Error) -> Self {
        use session::ErrorKind as SessionErrorKind;

        let error_kind = match err.error_kind {
            SessionErrorKind::NotAuthenticated => {
                DomainErrorKind::Internal(InternalErrorKind::Unauthenticated)
            }
            SessionErrorKind::Auth(_) => DomainErrorKind::External(ExternalErrorKind::Rejected),
            SessionErrorKind::Http(_) => DomainErrorKind::External(ExternalErrorKind::Network),
            SessionErrorKind::InvalidResponse => DomainErrorKind::External(
                ExternalErrorKind::Other("Malformed response from host".to_string()),
            ),
            SessionErrorKind::Storage(_) => DomainErrorKind::Internal(InternalErrorKind::Storage),
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<sse::Error> for Error {
    fn from(err: sse::Error) -> Self {
        let error_kind = match err.error_kind {
            sse::ErrorKind::NotAuthenticated => {
                DomainErrorKind::Internal(InternalErrorKind::Unauthenticated)
            }
            sse::ErrorKind::Transport => DomainErrorKind::External(ExternalErrorKind::Network),
            sse::ErrorKind::Closed => DomainErrorKind::Internal(InternalErrorKind::Other(
                "Event stream closed".to_string(),
            )),
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Errors that result from issues building the request, before any network call
        let error_kind = if err.is_builder() {
            DomainErrorKind::Internal(InternalErrorKind::Other(
                "Failed to build request".to_string(),
            ))
        } else if err.is_decode() {
            DomainErrorKind::External(ExternalErrorKind::Other(
                "Malformed response from host".to_string(),
            ))
        } else {
            DomainErrorKind::External(ExternalErrorKind::Network)
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
                error_kind: DomainErrorKind::External(ExternalErrorKind::Network),
            },
        }
    }
}

/// A non-success status from an endpoint without a more specific meaning.
pub(crate) fn status_error(url: &str, status: reqwest::StatusCode) -> Error {
    Error {
        source: Some(format!("{url} answered with {status}").into()),
        error_kind: DomainErrorKind::External(ExternalErrorKind::Network),
    }
}
