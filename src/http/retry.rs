//! Retry policy and connection-error classification for the transport layer.

use std::time::Duration;

/// Substrings (lowercase) that mark a connection failure as transient.
/// Connection resets plus handshake and record-layer TLS failures, in both
/// OpenSSL and rustls wording.
pub const TRANSIENT_ERROR_MARKERS: &[&str] = &[
    "econnreset",
    "connection reset",
    // rustls / hyper
    "invalidcontenttype",
    "corrupt message",
    "fatal alert",
    "handshakefailure",
    "badrecordmac",
    "unexpected-eof",
    "tls handshake eof",
    // OpenSSL
    "eproto",
    "ssl routines",
    "ssl3_read_bytes",
    "ssl3_get_record",
    "wrong version number",
    "bad record mac",
    "decryption failed",
    "handshake failure",
    "tlsv1 alert",
    "unexpected eof",
];

/// Backoff parameters for retrying one credential.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first send.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            backoff_factor: 2,
            max_delay: Duration::from_millis(100),
        }
    }
}

/// Delay before retry number `attempt + 1`:
/// `min(base_delay * backoff_factor^attempt, max_delay)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let multiplier = policy.backoff_factor.saturating_pow(attempt);
    policy
        .base_delay
        .saturating_mul(multiplier)
        .min(policy.max_delay)
}

/// Returns true when a connection error message looks transient.
pub fn is_transient(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Failure to complete an exchange for one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be built or the connection failed in a way
    /// that retrying will not fix.
    Fatal(String),
    /// Transient failures persisted past the retry budget.
    Exhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Fatal(msg) => {
                write!(f, "Upstream request failed: {}", msg)
            }
            TransportError::Exhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "Upstream request failed after {} attempts: {}",
                    attempts, last_error
                )
            }
        }
    }
}

impl std::error::Error for TransportError {}
