//! Sending one request for one credential, retrying transient connection failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method};

use super::retry::{RetryPolicy, TransportError, backoff_delay, is_transient};
use super::{RequestSpec, UpstreamResponse, resolve_url};
use crate::credential::Credential;

/// A fully built request, ready to go on the wire.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// One physical HTTP exchange.
///
/// Returns `Ok` for any completed exchange, whatever its status code. An
/// `Err` means the exchange did not complete at the transport level.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn execute(&self, request: &PreparedRequest) -> Result<UpstreamResponse>;
}

/// [`HttpSend`] backed by a reqwest [`Client`].
#[derive(Clone)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn execute(&self, request: &PreparedRequest) -> Result<UpstreamResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.context("Failed to send request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        Ok(UpstreamResponse::new(status, headers, body.to_vec()))
    }
}

/// Sends a request with a single credential, absorbing transient connection
/// failures with capped exponential backoff.
///
/// Status codes are never interpreted here; every completed exchange is
/// returned as-is.
pub struct TransportRetrier<S: HttpSend> {
    sender: S,
    base_url: String,
    policy: RetryPolicy,
}

impl<S: HttpSend> TransportRetrier<S> {
    pub fn new(sender: S, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            sender,
            base_url: base_url.into(),
            policy,
        }
    }

    /// Builds the wire request: default JSON and bearer headers, caller
    /// headers on top, then the serialized body for non-GET methods.
    pub fn prepare(
        &self,
        spec: &RequestSpec,
        credential: &Credential,
    ) -> Result<PreparedRequest, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|_| {
                TransportError::Fatal(format!(
                    "Credential {} is not a valid header value",
                    credential
                ))
            })?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        headers.extend(spec.headers.clone());
        if let Some(auth) = headers.get_mut(AUTHORIZATION) {
            auth.set_sensitive(true);
        }

        let body = match &spec.body {
            Some(body) if spec.method != Method::GET => {
                let serialized = body.serialize().map_err(|e| {
                    TransportError::Fatal(format!("Failed to serialize request body: {}", e))
                })?;
                headers.insert(CONTENT_LENGTH, HeaderValue::from(serialized.len()));
                Some(serialized)
            }
            _ => None,
        };

        Ok(PreparedRequest {
            method: spec.method.clone(),
            url: resolve_url(&self.base_url, &spec.path),
            headers,
            body,
        })
    }

    #[tracing::instrument(skip(self, spec, credential), fields(method = %spec.method, path = %spec.path))]
    pub async fn send(
        &self,
        spec: &RequestSpec,
        credential: &Credential,
    ) -> Result<UpstreamResponse, TransportError> {
        let request = self.prepare(spec, credential)?;
        let mut attempt: u32 = 0;

        loop {
            match self.sender.execute(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let message = format!("{:#}", e);

                    if !is_transient(&message) {
                        debug!(
                            "{} {} with {}: non-retryable error: {}",
                            request.method, request.url, credential, message
                        );
                        return Err(TransportError::Fatal(message));
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            "{} {} with {}: giving up after {} attempts ({})",
                            request.method,
                            request.url,
                            credential,
                            attempt + 1,
                            message
                        );
                        return Err(TransportError::Exhausted {
                            attempts: attempt + 1,
                            last_error: message,
                        });
                    }

                    let delay = backoff_delay(&self.policy, attempt);
                    warn!(
                        "{} {} with {}: attempt {}/{} failed ({}), retrying in {}ms...",
                        request.method,
                        request.url,
                        credential,
                        attempt + 1,
                        self.policy.max_attempts + 1,
                        message,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
