//! Per-minute cap on outbound LLM calls.

use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::error::LlmError;

/// What to do with a call that would exceed the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMode {
    /// Queue until a slot frees up.
    #[default]
    Wait,
    /// Reject immediately with `LlmError::RateLimited`.
    FailFast,
}

impl FromStr for RateLimitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "fail_fast" | "fail-fast" => Ok(Self::FailFast),
            other => Err(format!("unknown rate limit mode: {other}")),
        }
    }
}

/// Token-bucket limiter shared by every LLM call a generator makes.
#[derive(Clone)]
pub struct CallLimiter {
    inner: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    mode: RateLimitMode,
}

impl CallLimiter {
    /// Allow `calls` per minute. Zero disables limiting.
    pub fn per_minute(calls: u32, mode: RateLimitMode) -> Self {
        let inner = NonZeroU32::new(calls)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        Self { inner, mode }
    }

    pub fn unlimited() -> Self {
        Self {
            inner: None,
            mode: RateLimitMode::Wait,
        }
    }

    pub fn mode(&self) -> RateLimitMode {
        self.mode
    }

    /// Take one slot, waiting or failing per the configured mode.
    pub async fn acquire(&self) -> Result<(), LlmError> {
        let Some(limiter) = &self.inner else {
            return Ok(());
        };

        match self.mode {
            RateLimitMode::Wait => {
                limiter.until_ready().await;
                Ok(())
            }
            RateLimitMode::FailFast => limiter.check().map_err(|not_until| {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                debug!(?retry_after, "LLM call rejected by local rate limit");
                LlmError::RateLimited {
                    provider: "local-limiter".to_string(),
                    retry_after: Some(retry_after),
                }
            }),
        }
    }
}

impl std::fmt::Debug for CallLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLimiter")
            .field("limited", &self.inner.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}
