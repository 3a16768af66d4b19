//! HTTP client builder for talking to the bound host.

use std::time::Duration;

use reqwest_middleware::ClientBuilder;
use reqwest_retry::RetryTransientMiddleware;

use super::FixedDelayPolicy;
use crate::error::Error;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Default request timeout. Individual calls may override it.
    pub timeout: Duration,
    /// Maximum number of retries for the retrying client.
    pub max_retries: u32,
    /// Pause between retries.
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            user_agent: format!("sure-shot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Client that retries transient failures with a fixed delay.
pub type RetryingClient = reqwest_middleware::ClientWithMiddleware;

/// Both clients share one connection pool.
#[derive(Clone)]
pub struct HttpClients {
    /// For auth calls and anything that must not be repeated.
    pub plain: reqwest::Client,
    /// For idempotent reads.
    pub retrying: RetryingClient,
}

pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    pub fn with_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.config.retry_delay = retry_delay;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    pub fn build(self) -> Result<HttpClients, Error> {
        let plain = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()?;

        let retry_policy = FixedDelayPolicy::new(self.config.max_retries, self.config.retry_delay);
        let retrying = ClientBuilder::new(plain.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClients { plain, retrying })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
