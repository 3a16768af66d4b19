//! Calls against the host's auth endpoints.
//!
//! These never touch session state; [`crate::SessionState`] decides what a
//! result means for the record.

use std::time::Duration;

use log::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{auth_error, status_error, AuthErrorKind, Error};
use crate::types::{AuthCredentials, HostInfo};

/// Body of a `/ping` answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PongResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    device_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Builds the headers every authenticated request carries.
pub fn auth_headers(token: Option<&SecretString>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(err) => warn!("Held token is not a valid header value: {err:?}"),
        }
    }

    headers
}

/// `GET /ping`. Any 2xx counts as alive; the body is informational only.
pub async fn ping(client: &Client, host: &HostInfo, timeout: Duration) -> Result<PongResponse, Error> {
    let url = format!("{}/ping", host.base_url());
    debug!("Pinging {url}");

    let response = client.get(&url).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        warn!("Ping to {url} answered with {status}");
        return Err(status_error(status));
    }

    Ok(response.json::<PongResponse>().await.unwrap_or_default())
}

/// `GET /auth/verify` with the bearer token.
pub async fn verify_token(
    client: &Client,
    host: &HostInfo,
    token: &SecretString,
    timeout: Duration,
) -> Result<(), Error> {
    let url = format!("{}/auth/verify", host.base_url());

    let response = client
        .get(&url)
        .headers(auth_headers(Some(token)))
        .timeout(timeout)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        debug!("Token verification answered with {status}");
        Err(auth_error(
            AuthErrorKind::InvalidToken,
            &format!("verify answered with {status}"),
        ))
    }
}

/// `POST /auth/login`. Returns the issued bearer token.
pub async fn request_token(
    client: &Client,
    host: &HostInfo,
    credentials: &AuthCredentials,
    timeout: Duration,
) -> Result<SecretString, Error> {
    let url = format!("{}/auth/login", host.base_url());
    debug!("Logging in to {url} as {}", credentials.name);

    let response = client
        .post(&url)
        .json(&LoginRequest {
            device_id: &credentials.name,
            password: credentials.password.expose_secret(),
        })
        .timeout(timeout)
        .send()
        .await?;

    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED => {
            return Err(auth_error(AuthErrorKind::InvalidCredentials, "login answered 401"))
        }
        StatusCode::FORBIDDEN => {
            return Err(auth_error(AuthErrorKind::DeviceNotAuthorized, "login answered 403"))
        }
        status if !status.is_success() => {
            return Err(auth_error(
                AuthErrorKind::Rejected,
                &format!("login answered with {status}"),
            ))
        }
        _ => {}
    }

    let body = response.json::<LoginResponse>().await?;
    match (body.success, body.token) {
        (true, Some(token)) if !token.is_empty() => Ok(SecretString::new(token)),
        _ => Err(auth_error(
            AuthErrorKind::Rejected,
            body.message.as_deref().unwrap_or("login refused without a token"),
        )),
    }
}
