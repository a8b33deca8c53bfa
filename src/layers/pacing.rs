//! Pacing: a minimum gap between the end of one call and the start of the next.
//!
//! The gap is measured from when the previous call *finished* (successfully or
//! not) to when the next one is allowed to start. The first call through a
//! pipeline never waits.

use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::cancel::pause;
use crate::error::PipelineError;
use crate::pipeline::Layer;
use crate::request::CallSpec;
use crate::response::Response;

/// Timing state owned by one pacing layer.
#[derive(Debug, Default)]
pub struct PacingState {
    /// When the last call through this layer completed.
    /// `None` until the first call finishes.
    last_call_end: Option<Instant>,
}

impl PacingState {
    /// Time still to wait before a call may start, if any.
    #[must_use]
    pub fn remaining(&self, interval: Duration, now: Instant) -> Option<Duration> {
        if interval.is_zero() {
            return None;
        }
        let last = self.last_call_end?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < interval).then(|| interval - elapsed)
    }

    /// Records that a call just finished.
    pub fn mark(&mut self, now: Instant) {
        self.last_call_end = Some(now);
    }

    /// When the last call finished.
    #[must_use]
    pub fn last_call_end(&self) -> Option<Instant> {
        self.last_call_end
    }
}

/// Sleeps as needed so calls are spaced by at least `interval`.
pub struct PacingLayer {
    inner: Box<dyn Layer>,
    interval: Duration,
    state: PacingState,
}

impl PacingLayer {
    /// Wraps `inner`. A zero interval disables pacing.
    pub fn new(inner: Box<dyn Layer>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            state: PacingState::default(),
        }
    }

    /// The owned timing state.
    #[must_use]
    pub fn state(&self) -> &PacingState {
        &self.state
    }
}

impl Layer for PacingLayer {
    #[instrument(
        level = "debug",
        name = "pacing",
        skip_all,
        fields(interval_ms = self.interval.as_millis())
    )]
    fn call(&mut self, call: CallSpec) -> Result<Response, PipelineError> {
        if let Some(wait) = self.state.remaining(self.interval, Instant::now()) {
            debug!(wait_ms = wait.as_millis(), "pacing");
            pause(wait, call.cancel_token(), &call.url)?;
        }

        let result = self.inner.call(call);
        self.state.mark(Instant::now());
        result
    }
}
