//! Ensure layer: bounded attempts at getting an `ok` response.
//!
//! # Attempt Loop
//!
//! For attempt `i` in `0..attempts`:
//! - an `ok` response ends the loop and is returned;
//! - a non-ok response is retried, or returned if `i` is the last attempt;
//! - a transient error is swallowed unless `i` is the last attempt, in which
//!   case it is returned;
//! - any other error (cancellation included) is returned at once.
//!
//! A failed final attempt is always reported as that attempt's outcome, so
//! the layer never finishes without either a response or an error.
//!
//! # Backoff
//!
//! Between attempts the layer waits
//! `min(base_delay * multiplier^(attempt - 1), max_delay) + jitter`.
//! With the default zero base delay, attempts follow each other immediately.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::cancel::pause;
use crate::config::DEFAULT_ENSURE_ATTEMPTS;
use crate::error::PipelineError;
use crate::pipeline::Layer;
use crate::request::CallSpec;
use crate::response::Response;

/// Default maximum backoff between attempts (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter is at most this fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.1;

/// Attempt budget and backoff for the ensure layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsurePolicy {
    /// Maximum number of attempts, including the first.
    attempts: u32,
    /// Delay before the second attempt; zero disables backoff.
    base_delay: Duration,
    /// Upper bound on any single delay.
    max_delay: Duration,
    /// Growth factor per attempt.
    multiplier: f64,
}

impl Default for EnsurePolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ENSURE_ATTEMPTS,
            base_delay: Duration::ZERO,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl EnsurePolicy {
    /// Policy with `attempts` tries and no backoff. Zero is raised to one.
    #[must_use]
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub fn backoff(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Maximum attempts configured.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powf(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..=capped * JITTER_FRACTION);
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Repeats the inward call until it yields an `ok` response or attempts run out.
pub struct EnsureLayer {
    inner: Box<dyn Layer>,
    policy: EnsurePolicy,
}

impl EnsureLayer {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn Layer>, policy: EnsurePolicy) -> Self {
        Self { inner, policy }
    }
}

impl Layer for EnsureLayer {
    #[instrument(
        level = "debug",
        name = "ensure",
        skip_all,
        fields(url = %call.url, attempts = self.policy.attempts)
    )]
    fn call(&mut self, call: CallSpec) -> Result<Response, PipelineError> {
        let mut attempt = 1;
        loop {
            let is_last = attempt >= self.policy.attempts;
            match self.inner.call(call.clone()) {
                Ok(response) if response.ok() => {
                    debug!(attempt, status = response.status(), "ok response");
                    return Ok(response);
                }
                Ok(response) if is_last => {
                    debug!(attempt, status = response.status(), "attempts exhausted");
                    return Ok(response);
                }
                Ok(response) => {
                    debug!(attempt, status = response.status(), "response not ok, retrying");
                }
                Err(error) if error.is_transient() && !is_last => {
                    warn!(attempt, error = %error, "transient failure, retrying");
                }
                Err(error) => return Err(error),
            }

            let delay = self.policy.delay_after(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis(), "backing off");
                pause(delay, call.cancel_token(), &call.url)?;
            }
            attempt += 1;
        }
    }
}
