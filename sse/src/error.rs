//! Error types for the `sse` crate.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The session holds no valid binding, so there is nothing to connect to.
    NotAuthenticated,
    /// The underlying connection could not be opened or broke.
    Transport,
    /// The client was dropped while someone was still waiting on it.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.error_kind, &self.source) {
            (ErrorKind::NotAuthenticated, _) => write!(f, "Not authenticated"),
            (ErrorKind::Transport, Some(source)) => write!(f, "Event stream error: {source}"),
            (ErrorKind::Transport, None) => write!(f, "Event stream error"),
            (ErrorKind::Closed, _) => write!(f, "Event stream client closed"),
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
        let error_kind = match err.error_kind {
            session::ErrorKind::NotAuthenticated => ErrorKind::NotAuthenticated,
            _ => ErrorKind::Transport,
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

pub fn transport_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Transport,
    }
}

pub fn not_authenticated() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::NotAuthenticated,
    }
}
