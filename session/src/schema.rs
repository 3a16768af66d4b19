//! Versioned layout of the persisted session record and migrations between versions.
//!
//! The record lives under [`STORAGE_KEY`] as one JSON document. Every document
//! written carries an explicit `version` tag; documents without one predate
//! versioning and are read as version 1.

use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{storage_error, Error, StorageErrorKind};
use crate::types::{AuthCredentials, AuthStatus, HostInfo};

pub const STORAGE_KEY: &str = "sureshot_auth";

/// Version written by this build.
pub const SCHEMA_VERSION: u64 = 2;

/// What the session needs back after a restart.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub token: Option<SecretString>,
    pub auth_status: AuthStatus,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordV2 {
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    auth_status: AuthStatus,
}

/// Flat layout used before the status record existed.
#[derive(Deserialize)]
struct RecordV1 {
    // `authenticated` is ignored: a restored session is always re-verified
    #[serde(default)]
    host: Option<HostInfo>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl From<RecordV1> for RecordV2 {
    fn from(legacy: RecordV1) -> Self {
        let credentials = match (legacy.name, legacy.password) {
            (Some(name), Some(password)) => Some(AuthCredentials::new(name, password)),
            _ => None,
        };

        RecordV2 {
            version: SCHEMA_VERSION,
            token: None,
            auth_status: AuthStatus {
                is_server_reachable: false,
                is_authenticated: false,
                host: legacy.host,
                credentials,
                last_error: None,
            },
        }
    }
}

pub fn encode(session: &PersistedSession) -> Result<Value, Error> {
    let record = RecordV2 {
        version: SCHEMA_VERSION,
        token: session
            .token
            .as_ref()
            .map(|token| token.expose_secret().clone()),
        auth_status: session.auth_status.clone(),
    };
    Ok(serde_json::to_value(record)?)
}

pub fn decode(value: Value) -> Result<PersistedSession, Error> {
    let version = match value.get("version") {
        None => 1,
        Some(version) => version.as_u64().ok_or_else(|| {
            storage_error(StorageErrorKind::Serialization, "version tag is not a number")
        })?,
    };

    let record = match version {
        1 => {
            debug!("Migrating persisted session from schema version 1");
            RecordV2::from(serde_json::from_value::<RecordV1>(value)?)
        }
        SCHEMA_VERSION => serde_json::from_value::<RecordV2>(value)?,
        other => {
            return Err(storage_error(
                StorageErrorKind::UnsupportedVersion(other),
                "persisted session was written by a newer build",
            ))
        }
    };

    Ok(PersistedSession {
        token: record.token.map(SecretString::new),
        auth_status: record.auth_status,
    })
}
