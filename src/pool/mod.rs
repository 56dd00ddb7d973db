//! Credential pool abstraction.
//!
//! The dispatcher never decides which credential to use. It asks a
//! [`CredentialPool`] for a fresh [`IterationContext`] per logical request and
//! walks the candidates that context offers. Health tracking, cooldowns and
//! ordering all live behind these traits.
//!
//! # Structure
//!
//! - `rotating` - In-memory round-robin pool used by the CLI

mod rotating;

use crate::credential::Credential;
use std::sync::Arc;

pub use rotating::RotatingPool;

/// Aggregate counters for one iteration context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationStats {
    /// Number of candidates this context can offer in total.
    pub total_candidates: usize,
    /// Number of candidates marked rate-limited so far.
    pub rate_limited_count: usize,
}

/// Per-request view over a bounded set of candidate credentials.
///
/// A context is created at the start of one dispatch and dropped at its end.
/// It is never shared between concurrent dispatches.
#[cfg_attr(test, mockall::automock)]
pub trait IterationContext: Send {
    /// Returns the next candidate, or `None` once the set is exhausted.
    /// Each candidate is offered at most once.
    fn next_candidate(&mut self) -> Option<Credential>;

    fn mark_rate_limited(&mut self, credential: &Credential);

    /// Records a candidate whose transport attempt failed.
    fn mark_failed(&mut self, credential: &Credential);

    fn stats(&self) -> IterationStats;

    fn last_failed_credential(&self) -> Option<Credential>;

    /// True when every candidate offered so far was marked rate-limited.
    /// Vacuously true when nothing was offered.
    fn all_attempted_were_rate_limited(&self) -> bool;
}

/// Shared source of credentials.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialPool: Send + Sync {
    fn create_iteration_context(&self) -> Box<dyn IterationContext>;

    /// Bookkeeping hook called once at the end of an exhausted dispatch.
    /// Implementations must tolerate concurrent calls.
    fn record_last_failed_credential(&self, credential: &Credential);
}

impl<P: CredentialPool + ?Sized> CredentialPool for Arc<P> {
    fn create_iteration_context(&self) -> Box<dyn IterationContext> {
        (**self).create_iteration_context()
    }

    fn record_last_failed_credential(&self, credential: &Credential) {
        (**self).record_last_failed_credential(credential)
    }
}
