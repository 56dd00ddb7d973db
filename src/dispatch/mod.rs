//! Credential fallback for one logical request.
//!
//! The [`Dispatcher`] walks the candidates of a fresh iteration context,
//! sending through a [`TransportRetrier`] and classifying each completed
//! exchange. Rate-limited responses and transport failures move on to the
//! next credential; anything else is returned to the caller as-is.

mod events;

use anyhow::Result;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};

use crate::classify::{Classification, RATE_LIMIT_ERROR_TYPE, classify};
use crate::credential::Credential;
use crate::http::{HttpSend, RequestBody, RequestSpec, TransportError, TransportRetrier, UpstreamResponse};
use crate::pool::CredentialPool;

pub use events::{AttemptOutcome, AttemptRecord, DispatchEvents, ExhaustionSummary, LogEvents};

#[cfg(test)]
pub use events::MockDispatchEvents;

/// Message used in the synthesized 429 body.
pub const ALL_KEYS_RATE_LIMITED: &str = "All API keys are rate limited, please retry later";

/// Dispatch failed without any response to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No candidate produced a response and no failure was recorded.
    Exhausted { total_candidates: usize },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Exhausted { total_candidates } => write!(
                f,
                "No API key could serve the request ({} candidates)",
                total_candidates
            ),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Sends logical requests, falling back across credentials on rate limits
/// and transport failures.
pub struct Dispatcher<P: CredentialPool, S: HttpSend, E: DispatchEvents = LogEvents> {
    pool: P,
    retrier: TransportRetrier<S>,
    events: E,
}

impl<P: CredentialPool, S: HttpSend> Dispatcher<P, S, LogEvents> {
    pub fn new(pool: P, retrier: TransportRetrier<S>) -> Self {
        Self {
            pool,
            retrier,
            events: LogEvents,
        }
    }
}

impl<P: CredentialPool, S: HttpSend, E: DispatchEvents> Dispatcher<P, S, E> {
    /// Replaces the event sink.
    pub fn with_events<E2: DispatchEvents>(self, events: E2) -> Dispatcher<P, S, E2> {
        Dispatcher {
            pool: self.pool,
            retrier: self.retrier,
            events,
        }
    }

    /// Issues a logical request from its parts.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        headers: Option<HeaderMap>,
    ) -> Result<UpstreamResponse> {
        let spec = RequestSpec {
            method,
            path: path.to_string(),
            body,
            headers: headers.unwrap_or_default(),
        };
        self.dispatch(&spec).await
    }

    /// Delivers `spec` using the first credential that is not rate limited.
    ///
    /// Returns the upstream response unless no credential produced one:
    /// - all candidates rate limited: the last rate-limited response, or a
    ///   synthesized 429 when there were no candidates
    /// - otherwise the last [`TransportError`], or [`DispatchError::Exhausted`]
    #[tracing::instrument(skip(self, spec), fields(method = %spec.method, path = %spec.path))]
    pub async fn dispatch(&self, spec: &RequestSpec) -> Result<UpstreamResponse> {
        let mut context = self.pool.create_iteration_context();
        let mut rate_limited_response: Option<UpstreamResponse> = None;
        let mut last_error: Option<TransportError> = None;
        let mut attempted = 0usize;

        while let Some(credential) = context.next_candidate() {
            attempted += 1;

            let response = match self.retrier.send(spec, &credential).await {
                Ok(response) => response,
                Err(e) => {
                    context.mark_failed(&credential);
                    self.report(spec, &credential, AttemptOutcome::TransportFailed(e.to_string()));
                    last_error = Some(e);
                    continue;
                }
            };

            let outcome = match classify(response.status, &response.body) {
                Classification::Success => {
                    self.report(spec, &credential, AttemptOutcome::Accepted(response.status));
                    return Ok(response);
                }
                Classification::HardRateLimited => AttemptOutcome::HardRateLimited,
                Classification::SoftRateLimited => AttemptOutcome::SoftRateLimited,
            };

            context.mark_rate_limited(&credential);
            self.report(spec, &credential, outcome);
            rate_limited_response = Some(response);
        }

        let last_failed = context.last_failed_credential();
        if let Some(credential) = &last_failed {
            self.pool.record_last_failed_credential(credential);
        }

        let stats = context.stats();
        self.events.on_exhausted(&ExhaustionSummary {
            method: spec.method.clone(),
            path: spec.path.clone(),
            attempted,
            stats,
            last_failed: last_failed.map(|c| c.masked()),
        });

        if context.all_attempted_were_rate_limited() {
            return Ok(rate_limited_response.unwrap_or_else(rate_limit_response));
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(DispatchError::Exhausted {
                total_candidates: stats.total_candidates,
            }
            .into()),
        }
    }

    fn report(&self, spec: &RequestSpec, credential: &Credential, outcome: AttemptOutcome) {
        self.events.on_attempt(&AttemptRecord {
            credential: credential.masked(),
            method: spec.method.clone(),
            path: spec.path.clone(),
            outcome,
        });
    }
}

/// The 429 returned when every key is rate limited and no upstream
/// response is available.
pub fn rate_limit_response() -> UpstreamResponse {
    let body = serde_json::json!({
        "error": {
            "message": ALL_KEYS_RATE_LIMITED,
            "type": RATE_LIMIT_ERROR_TYPE,
            "code": RATE_LIMIT_ERROR_TYPE,
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    UpstreamResponse::new(StatusCode::TOO_MANY_REQUESTS, headers, body.to_string())
}
