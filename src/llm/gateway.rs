//! Oracle gateway - rate-governed access to the completion client
//!
//! The gateway is the only component that talks to the inference API. It
//! enforces a rolling call budget and retries failures with two independent
//! policies:
//!
//! - quota/rate exhaustion: an escalating fixed delay schedule, and the
//!   ceiling for this gateway is permanently lowered
//! - other transient failures: capped exponential backoff
//!
//! Client-side errors that cannot succeed on retry are surfaced immediately.
//! The gateway knows nothing about tasks, goals or pages.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::{OracleConfig, PilotError, Result};
use crate::llm::clock::{Clock, TokioClock};
use crate::llm::traits::{Attachment, CompletionClient, CompletionRequest};

/// Rolling call budget of one gateway
#[derive(Debug, Clone)]
pub struct RateLimitState {
    window_start: Instant,
    calls_in_window: u32,
    ceiling_per_window: u32,
    window_duration: Duration,
}

impl RateLimitState {
    pub fn new(ceiling_per_window: u32, window_duration: Duration, now: Instant) -> Self {
        Self {
            window_start: now,
            calls_in_window: 0,
            ceiling_per_window: ceiling_per_window.max(1),
            window_duration,
        }
    }

    /// Admit one call, or return how long to wait before asking again
    ///
    /// Resets the window when it has elapsed; the counter is incremented only
    /// when the call is admitted.
    pub fn try_acquire(&mut self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window_duration {
            self.window_start = now;
            self.calls_in_window = 0;
        }

        if self.calls_in_window < self.ceiling_per_window {
            self.calls_in_window += 1;
            return None;
        }

        let remaining = self.window_duration.saturating_sub(elapsed);
        Some(remaining.max(Duration::from_millis(1)))
    }

    /// Permanently lower the ceiling; never raised again
    pub fn lower_ceiling(&mut self, factor: f64, min_ceiling: u32) -> u32 {
        let min_ceiling = min_ceiling.max(1);
        if self.ceiling_per_window > min_ceiling {
            let scaled = (self.ceiling_per_window as f64 * factor).floor() as u32;
            self.ceiling_per_window = scaled
                .min(self.ceiling_per_window - 1)
                .max(min_ceiling);
        }
        self.ceiling_per_window
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling_per_window
    }

    pub fn calls_in_window(&self) -> u32 {
        self.calls_in_window
    }

    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }
}

/// How a failed attempt is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    RateLimited,
    Transient,
    NonRetryable,
}

fn classify(error: &PilotError) -> FailureKind {
    if error.is_rate_limited() {
        FailureKind::RateLimited
    } else if error.is_non_retryable() {
        FailureKind::NonRetryable
    } else {
        FailureKind::Transient
    }
}

/// Retry timing for the gateway
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_schedule: Vec<Duration>,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            rate_limit_schedule: config
                .rate_limit_schedule_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay after the `n`th rate-limit failure (0-based), clamped at the last entry
    pub fn rate_limit_delay(&self, n: usize) -> Duration {
        match self.rate_limit_schedule.len() {
            0 => self.backoff_cap,
            len => self.rate_limit_schedule[n.min(len - 1)],
        }
    }

    /// Delay after the `n`th transient failure (0-based)
    pub fn transient_delay(&self, n: u32) -> Duration {
        let factor = 2u32.saturating_pow(n);
        let delay = self
            .backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap);

        if self.jitter.is_zero() {
            delay
        } else {
            let extra = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
            delay + Duration::from_millis(extra)
        }
    }
}

/// Rate-limited, retrying wrapper around a completion client
///
/// Safe to share between concurrent control loops: the window check and
/// increment happen under one lock.
pub struct OracleGateway {
    client: Arc<dyn CompletionClient>,
    clock: Arc<dyn Clock>,
    state: Mutex<RateLimitState>,
    policy: RetryPolicy,
    ceiling_backoff_factor: f64,
    min_ceiling: u32,
}

impl OracleGateway {
    /// Create a gateway on real time
    pub fn new(client: Arc<dyn CompletionClient>, config: &OracleConfig) -> Self {
        Self::with_clock(client, config, Arc::new(TokioClock))
    }

    /// Create a gateway on an injected clock
    pub fn with_clock(
        client: Arc<dyn CompletionClient>,
        config: &OracleConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = RateLimitState::new(config.ceiling_per_window, config.window(), clock.now());
        Self {
            client,
            clock,
            state: Mutex::new(state),
            policy: RetryPolicy::from_config(config),
            ceiling_backoff_factor: config.ceiling_backoff_factor,
            min_ceiling: config.min_ceiling,
        }
    }

    /// Current calls-per-window ceiling
    pub fn ceiling(&self) -> u32 {
        self.lock_state().ceiling()
    }

    /// Copy of the current rate limit state
    pub fn rate_limit_state(&self) -> RateLimitState {
        self.lock_state().clone()
    }

    /// Name of the underlying client
    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RateLimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete a prompt with default sampling options
    pub async fn complete(&self, prompt: &str, attachments: &[Attachment]) -> Result<String> {
        let request = CompletionRequest::new(prompt).attachments(attachments.to_vec());
        self.complete_request(&request).await
    }

    /// Complete a full request, applying the rate limit and retry policies
    pub async fn complete_request(&self, request: &CompletionRequest) -> Result<String> {
        let mut rate_limited = 0usize;
        let mut transient = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.acquire_slot().await;

            let error = match self.client.complete(request).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!(attempt, "oracle call succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(e) => e,
            };

            let kind = classify(&error);
            if kind == FailureKind::NonRetryable || attempt >= self.policy.max_attempts {
                warn!(attempt, ?kind, error = %error, "giving up on oracle call");
                return Err(PilotError::OracleFatal {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = match kind {
                FailureKind::RateLimited => {
                    let delay = self.policy.rate_limit_delay(rate_limited);
                    rate_limited += 1;
                    let (before, after) = {
                        let mut state = self.lock_state();
                        let before = state.ceiling();
                        (before, state.lower_ceiling(self.ceiling_backoff_factor, self.min_ceiling))
                    };
                    if after < before {
                        info!(from = before, to = after, "lowered oracle call ceiling");
                    }
                    delay
                }
                _ => {
                    let delay = self.policy.transient_delay(transient);
                    transient += 1;
                    delay
                }
            };

            warn!(
                attempt,
                ?kind,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "oracle call failed, retrying"
            );
            self.clock.sleep(delay).await;
        }
    }

    /// Block until the rolling window admits one more call
    async fn acquire_slot(&self) {
        loop {
            let wait = {
                let mut state = self.lock_state();
                state.try_acquire(self.clock.now())
            };

            match wait {
                None => return,
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "oracle call budget exhausted, waiting");
                    self.clock.sleep(wait).await;
                }
            }
        }
    }
}
