//! Token-bucket admission control and retry backoff for provider and DMS
//! calls.
//!
//! ## Division of labour
//!
//! Providers never retry internally and never sleep. The [`RateLimiter`]
//! answers exactly one question — "may I send a request right now?" — via the
//! non-blocking [`RateLimiter::try_acquire`]; callers decide how to wait.
//! [`retry`] wraps a fallible async operation with exponential backoff and
//! jitter, retrying only errors classified retryable by
//! [`crate::error::SplitError::is_retryable`].
//!
//! ## Why jitter?
//!
//! Batch mode runs several workers against one provider. Without jitter,
//! workers that hit a 429 at the same moment would all retry at the same
//! moment and immediately re-trigger the limit. A uniform multiplier in
//! `[0.1, 2.0]` spreads the retries across a 20× window.
//!
//! Bucket time is monotonic (`Instant`); wall-clock adjustments cannot
//! refund or burn tokens.

use crate::error::SplitError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ── Rate limiter ─────────────────────────────────────────────────────────

/// Token-bucket settings: steady refill rate and initial burst capacity.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
    pub burst_limit: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst_limit: 10,
        }
    }
}

/// Point-in-time view of the limiter, for stats and logs. Pure read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterStats {
    pub requests_last_minute: usize,
    pub tokens_remaining: f64,
    pub requests_per_minute: u32,
    pub burst_limit: u32,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// Timestamps of granted requests, pruned to the trailing minute.
    history: VecDeque<Instant>,
}

/// Token-bucket admission controller.
///
/// One process-wide instance is shared by every worker; the bucket state is
/// the only mutable shared resource in the crate and lives behind this mutex.
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(BucketState {
                tokens: settings.burst_limit as f64,
                last_refill: Instant::now(),
                history: VecDeque::new(),
            }),
        }
    }

    pub fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Take a token if one is available. Returns `false` on denial; never
    /// blocks or sleeps.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.history.push_back(now);
            Self::prune_history(&mut state, now);
            true
        } else {
            debug!(
                tokens = state.tokens,
                "rate limiter denied request (bucket empty)"
            );
            false
        }
    }

    /// Current stats: granted requests in the trailing minute, fractional
    /// tokens remaining, and the configured limits.
    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state, now);
        Self::prune_history(&mut state, now);
        RateLimiterStats {
            requests_last_minute: state.history.len(),
            tokens_remaining: state.tokens,
            requests_per_minute: self.settings.requests_per_minute,
            burst_limit: self.settings.burst_limit,
        }
    }

    /// A reasonable sleep interval between `try_acquire` polls: the time one
    /// token takes to refill, capped at a second so cancellation stays
    /// responsive.
    pub fn poll_interval(&self) -> Duration {
        let per_token = 60.0 / self.settings.requests_per_minute.max(1) as f64;
        Duration::from_secs_f64(per_token.min(1.0))
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let rate_per_sec = self.settings.requests_per_minute as f64 / 60.0;
        state.tokens =
            (state.tokens + elapsed * rate_per_sec).min(self.settings.burst_limit as f64);
        state.last_refill = now;
    }

    fn prune_history(state: &mut BucketState, now: Instant) {
        while let Some(front) = state.history.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                state.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Poll `try_acquire` until a token is granted or the run is cancelled.
///
/// This is the caller-side wait loop; the limiter itself never blocks.
pub async fn acquire_with_wait(
    limiter: &RateLimiter,
    cancel: &crate::model::CancelToken,
) -> Result<(), SplitError> {
    loop {
        if cancel.is_cancelled() {
            return Err(SplitError::Cancelled);
        }
        if limiter.try_acquire() {
            return Ok(());
        }
        tokio::time::sleep(limiter.poll_interval()).await;
    }
}

// ── Backoff ──────────────────────────────────────────────────────────────

/// Exponential-backoff parameters for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts including the first. Minimum 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt thereafter.
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retrying after the given 0-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor.min(u32::MAX as u64) as u32)
            .min(self.max_delay)
    }
}

/// Apply the uniform jitter multiplier in `[0.1, 2.0]`.
fn jittered(delay: Duration) -> Duration {
    use rand::Rng;
    let factor: f64 = rand::thread_rng().gen_range(0.1..=2.0);
    delay.mul_f64(factor)
}

/// Execute `op` with exponential backoff.
///
/// `op` receives the 0-based attempt index. Errors whose
/// [`SplitError::is_retryable`] is false surface immediately; the final
/// attempt's failure is surfaced to the caller unchanged.
pub async fn retry<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T, SplitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SplitError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err: Option<SplitError> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = jittered(policy.delay_for_attempt(attempt - 1));
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                debug!(attempt, error = %e, "retryable failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| SplitError::Internal("retry loop exhausted".into())))
}
