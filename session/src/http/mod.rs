//! HTTP client building with middleware.

mod client;
mod retry;

pub use client::{HttpClientBuilder, HttpClientConfig, HttpClients, RetryingClient};
pub use retry::FixedDelayPolicy;
