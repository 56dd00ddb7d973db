use log::{debug, info, warn};
use reqwest::{Method, StatusCode};
use std::fmt;

use crate::pool::IterationStats;

/// What happened to one candidate credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The response is handed back to the caller, whatever its status.
    Accepted(StatusCode),
    HardRateLimited,
    SoftRateLimited,
    TransportFailed(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Accepted(status) => write!(f, "accepted ({})", status.as_u16()),
            AttemptOutcome::HardRateLimited => f.write_str("rate limited (429)"),
            AttemptOutcome::SoftRateLimited => f.write_str("rate limited (embedded error)"),
            AttemptOutcome::TransportFailed(msg) => write!(f, "transport failure: {}", msg),
        }
    }
}

/// One candidate attempt. The credential is already masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub credential: String,
    pub method: Method,
    pub path: String,
    pub outcome: AttemptOutcome,
}

/// End-of-loop summary when every candidate was used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExhaustionSummary {
    pub method: Method,
    pub path: String,
    pub attempted: usize,
    pub stats: IterationStats,
    pub last_failed: Option<String>,
}

/// Sink for dispatch decisions.
///
/// Implementations must not fail or block; they never influence the
/// fallback loop.
#[cfg_attr(test, mockall::automock)]
pub trait DispatchEvents: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord);
    fn on_exhausted(&self, summary: &ExhaustionSummary);
}

/// Writes dispatch events through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEvents;

impl DispatchEvents for LogEvents {
    fn on_attempt(&self, record: &AttemptRecord) {
        match &record.outcome {
            AttemptOutcome::Accepted(_) => debug!(
                "{} {} with key {}: {}",
                record.method, record.path, record.credential, record.outcome
            ),
            AttemptOutcome::HardRateLimited | AttemptOutcome::SoftRateLimited => info!(
                "{} {} with key {}: {}, trying next key",
                record.method, record.path, record.credential, record.outcome
            ),
            AttemptOutcome::TransportFailed(_) => warn!(
                "{} {} with key {}: {}, trying next key",
                record.method, record.path, record.credential, record.outcome
            ),
        }
    }

    fn on_exhausted(&self, summary: &ExhaustionSummary) {
        warn!(
            "{} {}: all keys exhausted ({} tried of {}, {} rate limited, last failed: {})",
            summary.method,
            summary.path,
            summary.attempted,
            summary.stats.total_candidates,
            summary.stats.rate_limited_count,
            summary.last_failed.as_deref().unwrap_or("none")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_outcome_display() {
        assert_eq!(
            AttemptOutcome::Accepted(StatusCode::OK).to_string(),
            "accepted (200)"
        );
        assert_eq!(
            AttemptOutcome::HardRateLimited.to_string(),
            "rate limited (429)"
        );
        assert!(
            AttemptOutcome::TransportFailed("reset".to_string())
                .to_string()
                .contains("reset")
        );
    }

    #[test_log::test]
    fn test_log_events_do_not_panic() {
        let events = LogEvents;
        events.on_attempt(&AttemptRecord {
            credential: "sk-a…wxyz".to_string(),
            method: Method::POST,
            path: "/chat".to_string(),
            outcome: AttemptOutcome::SoftRateLimited,
        });
        events.on_exhausted(&ExhaustionSummary {
            method: Method::POST,
            path: "/chat".to_string(),
            attempted: 2,
            stats: IterationStats {
                total_candidates: 2,
                rate_limited_count: 2,
            },
            last_failed: None,
        });
    }
}
