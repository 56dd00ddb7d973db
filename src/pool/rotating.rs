use anyhow::{Result, bail};
use log::debug;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CredentialPool, IterationContext, IterationStats};
use crate::credential::Credential;

/// Fixed set of credentials handed out round-robin.
///
/// Every iteration context offers each credential exactly once. The starting
/// offset advances by one per context so consecutive requests spread their
/// first attempt across the pool.
pub struct RotatingPool {
    credentials: Vec<Credential>,
    next_offset: AtomicUsize,
    last_failed: Mutex<Option<Credential>>,
}

impl RotatingPool {
    pub fn new(credentials: Vec<Credential>) -> Result<Self> {
        if credentials.is_empty() {
            bail!("At least one API key is required");
        }

        Ok(Self {
            credentials,
            next_offset: AtomicUsize::new(0),
            last_failed: Mutex::new(None),
        })
    }

    /// Parses a comma-separated key list, ignoring blanks and duplicates.
    pub fn from_key_list(keys: &str) -> Result<Self> {
        let mut seen = HashSet::new();
        let credentials = keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .filter(|k| seen.insert(k.to_string()))
            .map(Credential::from)
            .collect();
        Self::new(credentials)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// The credential most recently reported by an exhausted dispatch.
    pub fn last_failed(&self) -> Option<Credential> {
        match self.last_failed.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CredentialPool for RotatingPool {
    fn create_iteration_context(&self) -> Box<dyn IterationContext> {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed) % self.credentials.len();
        let mut order = self.credentials.clone();
        order.rotate_left(offset);
        Box::new(RotatingContext::new(order))
    }

    fn record_last_failed_credential(&self, credential: &Credential) {
        debug!("Recording last failed credential {}", credential);
        let mut guard = match self.last_failed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(credential.clone());
    }
}

/// Iteration state for one dispatch over a [`RotatingPool`].
struct RotatingContext {
    candidates: Vec<Credential>,
    position: usize,
    rate_limited: HashSet<Credential>,
    last_failed: Option<Credential>,
}

impl RotatingContext {
    fn new(candidates: Vec<Credential>) -> Self {
        Self {
            candidates,
            position: 0,
            rate_limited: HashSet::new(),
            last_failed: None,
        }
    }
}

impl IterationContext for RotatingContext {
    fn next_candidate(&mut self) -> Option<Credential> {
        let candidate = self.candidates.get(self.position).cloned();
        if candidate.is_some() {
            self.position += 1;
        }
        candidate
    }

    fn mark_rate_limited(&mut self, credential: &Credential) {
        self.rate_limited.insert(credential.clone());
        self.last_failed = Some(credential.clone());
    }

    fn mark_failed(&mut self, credential: &Credential) {
        self.last_failed = Some(credential.clone());
    }

    fn stats(&self) -> IterationStats {
        IterationStats {
            total_candidates: self.candidates.len(),
            rate_limited_count: self.rate_limited.len(),
        }
    }

    fn last_failed_credential(&self) -> Option<Credential> {
        self.last_failed.clone()
    }

    fn all_attempted_were_rate_limited(&self) -> bool {
        self.rate_limited.len() == self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(keys: &[&str]) -> Vec<Credential> {
        keys.iter().map(|k| Credential::from(*k)).collect()
    }

    fn drain(ctx: &mut dyn IterationContext) -> Vec<String> {
        std::iter::from_fn(|| ctx.next_candidate())
            .map(|c| c.expose().to_string())
            .collect()
    }

    #[test]
    fn test_new_rejects_empty_pool() {
        assert!(RotatingPool::new(Vec::new()).is_err());
        assert!(RotatingPool::from_key_list(" , ,").is_err());
    }

    #[test]
    fn test_from_key_list_trims_and_dedups() {
        let pool = RotatingPool::from_key_list(" key-a ,key-b,,key-a").unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_context_offers_each_candidate_once() {
        let pool = RotatingPool::new(creds(&["a", "b", "c"])).unwrap();
        let mut ctx = pool.create_iteration_context();

        assert_eq!(drain(ctx.as_mut()), vec!["a", "b", "c"]);
        assert!(ctx.next_candidate().is_none());
    }

    #[test]
    fn test_contexts_rotate_starting_offset() {
        let pool = RotatingPool::new(creds(&["a", "b", "c"])).unwrap();

        let mut first = pool.create_iteration_context();
        let mut second = pool.create_iteration_context();
        let mut fourth = {
            let _third = pool.create_iteration_context();
            pool.create_iteration_context()
        };

        assert_eq!(drain(first.as_mut()), vec!["a", "b", "c"]);
        assert_eq!(drain(second.as_mut()), vec!["b", "c", "a"]);
        assert_eq!(drain(fourth.as_mut()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rate_limit_bookkeeping() {
        let pool = RotatingPool::new(creds(&["a", "b"])).unwrap();
        let mut ctx = pool.create_iteration_context();

        assert!(ctx.all_attempted_were_rate_limited());

        let a = ctx.next_candidate().unwrap();
        ctx.mark_rate_limited(&a);
        assert!(ctx.all_attempted_were_rate_limited());
        assert_eq!(ctx.last_failed_credential(), Some(a.clone()));

        let b = ctx.next_candidate().unwrap();
        ctx.mark_failed(&b);
        assert!(!ctx.all_attempted_were_rate_limited());
        assert_eq!(ctx.last_failed_credential(), Some(b));

        assert_eq!(
            ctx.stats(),
            IterationStats {
                total_candidates: 2,
                rate_limited_count: 1,
            }
        );
    }

    #[test]
    fn test_record_last_failed_credential() {
        let pool = RotatingPool::new(creds(&["a", "b"])).unwrap();
        assert!(pool.last_failed().is_none());

        pool.record_last_failed_credential(&Credential::from("b"));
        assert_eq!(pool.last_failed(), Some(Credential::from("b")));
    }
}
