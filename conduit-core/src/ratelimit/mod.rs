//! Fixed-window rate limiting keyed by route class and client identity.
//!
//! The counter backend is chosen once at startup: the shared REST store when
//! it is configured and answers a probe, otherwise process-local counters.

mod local;
mod shared;

pub use local::LocalCounterStore;
pub use shared::SharedCounterStore;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BackendKind, RateLimitConfig, RouteLimit};
use crate::error::GatewayError;

/// Prefix of every counter key.
pub const KEY_PREFIX: &str = "conduit:rl";

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("counter store unreachable: {0}")]
    Unreachable(String),

    #[error("counter store error: {0}")]
    Store(String),
}

impl From<RateLimitError> for GatewayError {
    fn from(err: RateLimitError) -> Self {
        // Fail closed: a broken store never lets the request through.
        GatewayError::internal(err)
    }
}

/// Which quota a route draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Auth,
    Chat,
    Default,
    VectorSearch,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::Chat => "chat",
            RouteClass::Default => "default",
            RouteClass::VectorSearch => "vector_search",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u64,
    /// Time until the current window closes
    pub reset_after: Duration,
}

/// Where counters live.
///
/// `increment` must be atomic per key: concurrent callers each observe a
/// distinct count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError>;

    fn backend(&self) -> BackendKind;

    /// Drops expired state. Stores with native expiry have nothing to do.
    fn sweep(&self) -> usize {
        0
    }
}

/// An admitted request's standing in its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl Decision {
    /// Seconds until reset, rounded up.
    pub fn reset_secs(&self) -> u64 {
        ceil_secs(self.reset_after)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limits: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limits: RateLimitConfig) -> Self {
        Self { store, limits }
    }

    /// Local counters with the given limits.
    pub fn local(limits: RateLimitConfig) -> Self {
        Self::new(Arc::new(LocalCounterStore::new()), limits)
    }

    /// Picks the backend once.
    ///
    /// A shared store that is misconfigured or fails its probe degrades to
    /// local counters with a warning; startup never fails because of it.
    pub async fn connect(limits: RateLimitConfig) -> Self {
        if limits.backend == BackendKind::Local {
            info!("rate limiting with local counters");
            return Self::local(limits);
        }

        let Some(url) = limits.shared_url.clone() else {
            warn!("shared rate-limit backend has no URL, falling back to local counters");
            return Self::local(limits);
        };

        let store = match SharedCounterStore::new(&url, limits.shared_token.clone()) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "failed to build shared counter client, falling back to local counters");
                return Self::local(limits);
            }
        };

        match store.ping().await {
            Ok(()) => {
                info!(%url, "rate limiting with shared counters");
                Self::new(Arc::new(store), limits)
            }
            Err(e) => {
                warn!(%url, error = %e, "shared counter store failed its probe, falling back to local counters");
                Self::local(limits)
            }
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.store.backend()
    }

    pub fn limit_for(&self, class: RouteClass) -> &RouteLimit {
        match class {
            RouteClass::Auth => &self.limits.auth,
            RouteClass::Chat => &self.limits.chat,
            RouteClass::Default => &self.limits.default,
            RouteClass::VectorSearch => &self.limits.vector_search,
        }
    }

    pub fn key(class: RouteClass, identity: &str) -> String {
        format!("{KEY_PREFIX}:{class}:{identity}")
    }

    /// Counts one request against `identity`'s quota for `class`.
    ///
    /// Requests past the quota fail with `RateLimited` carrying the seconds
    /// until the window resets.
    pub async fn check(&self, class: RouteClass, identity: &str) -> Result<Decision, GatewayError> {
        let limit = self.limit_for(class);
        let window = Duration::from_millis(limit.window_ms);
        let hit = self.store.increment(&Self::key(class, identity), window).await?;

        if hit.count > u64::from(limit.max) {
            let retry_after_secs = ceil_secs(hit.reset_after).max(1);
            tracing::debug!(%class, %identity, retry_after_secs, "rate limit exceeded");
            return Err(GatewayError::RateLimited {
                message: limit.message.clone(),
                retry_after_secs,
            });
        }

        Ok(Decision {
            limit: limit.max,
            remaining: limit.max - hit.count as u32,
            reset_after: hit.reset_after,
        })
    }

    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowHit, RateLimitError> {
            Err(RateLimitError::Unreachable("connection refused".into()))
        }

        fn backend(&self) -> BackendKind {
            BackendKind::Shared
        }
    }

    fn limits() -> RateLimitConfig {
        RateLimitConfig {
            chat: RouteLimit::new(60_000, 3, "slow down"),
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(RateLimiter::key(RouteClass::VectorSearch, "user:1"), "conduit:rl:vector_search:user:1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_then_reject_then_reset() {
        let limiter = RateLimiter::local(limits());

        for remaining in [2, 1, 0] {
            let decision = limiter.check(RouteClass::Chat, "user:1").await.unwrap();
            assert_eq!(decision.remaining, remaining);
            assert_eq!(decision.limit, 3);
        }

        tokio::time::advance(Duration::from_millis(15_500)).await;
        match limiter.check(RouteClass::Chat, "user:1").await {
            Err(GatewayError::RateLimited { message, retry_after_secs }) => {
                assert_eq!(message, "slow down");
                assert_eq!(retry_after_secs, 45);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(limiter.check(RouteClass::Chat, "user:1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_classes_and_identities_are_separate() {
        let limiter = RateLimiter::local(limits());
        for _ in 0..3 {
            limiter.check(RouteClass::Chat, "user:1").await.unwrap();
        }
        assert!(limiter.check(RouteClass::Chat, "user:1").await.is_err());
        assert!(limiter.check(RouteClass::Chat, "user:2").await.is_ok());
        assert!(limiter.check(RouteClass::Default, "user:1").await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), limits());
        let err = limiter.check(RouteClass::Chat, "user:1").await.unwrap_err();
        assert_eq!(err.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn test_unreachable_shared_store_degrades_to_local() {
        let config = RateLimitConfig {
            backend: BackendKind::Shared,
            shared_url: Some("http://127.0.0.1:9".into()),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::connect(config).await;
        assert_eq!(limiter.backend(), BackendKind::Local);
    }

    #[test]
    fn test_reset_rounds_up() {
        let decision = Decision {
            limit: 1,
            remaining: 0,
            reset_after: Duration::from_millis(1001),
        };
        assert_eq!(decision.reset_secs(), 2);
    }
}
