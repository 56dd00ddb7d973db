//! Outbound client for a rate-limited upstream API.
//!
//! A logical request is sent with one credential at a time. Transient
//! connection failures are retried on the same credential with capped
//! exponential backoff; rate-limited responses (HTTP 429, or HTTP 200 with
//! an embedded rate-limit error) fall back to the next credential offered by
//! the pool.

pub mod classify;
pub mod config;
pub mod credential;
pub mod dispatch;
pub mod http;
pub mod pool;

pub use classify::{Classification, classify};
pub use config::ClientConfig;
pub use credential::Credential;
pub use dispatch::{DispatchError, Dispatcher};
pub use http::{RequestBody, RequestSpec, RetryPolicy, TransportError, UpstreamResponse};
pub use pool::{CredentialPool, IterationContext, RotatingPool};
