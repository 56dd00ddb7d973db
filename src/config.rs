use anyhow::{Context, Result, bail, ensure};
use log::debug;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::Dispatcher;
use crate::http::{ReqwestSender, RetryPolicy, TransportRetrier};
use crate::pool::RotatingPool;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Everything needed to build a ready-to-use [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Comma-separated API keys.
    pub keys: String,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: Option<String>, keys: impl Into<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            keys: keys.into(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("keyrelay/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL '{}'", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Base URL must use http or https, got '{}'", url.scheme());
        }

        ensure!(self.retry.backoff_factor > 0, "Backoff factor must be positive");
        ensure!(!self.retry.base_delay.is_zero(), "Base delay must be positive");
        ensure!(
            self.retry.max_delay >= self.retry.base_delay,
            "Max delay must not be smaller than base delay"
        );
        ensure!(!self.timeout.is_zero(), "Timeout must be positive");

        Ok(())
    }

    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    pub fn into_dispatcher(self) -> Result<Dispatcher<Arc<RotatingPool>, ReqwestSender>> {
        self.validate()?;

        let pool = Arc::new(RotatingPool::from_key_list(&self.keys)?);
        let client = self.build_client()?;
        debug!(
            "Dispatching to {} with {} keys, retry policy {:?}",
            self.base_url,
            pool.len(),
            self.retry
        );

        let retrier = TransportRetrier::new(ReqwestSender::new(client), self.base_url, self.retry);
        Ok(Dispatcher::new(pool, retrier))
    }
}
