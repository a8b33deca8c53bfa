//! Caller-initiated cancellation.
//!
//! A [`CancelToken`] travels with a call inside its options. The executor checks
//! it around network I/O and every sleep a layer performs (pacing, backoff) waits
//! on it, so a cancel wakes the calling thread immediately.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::PipelineError;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every call carrying this token and wakes any sleeper.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    /// Returns whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for `duration` or until cancelled, whichever comes first.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _timeout) = self
            .inner
            .signal
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Blocks the calling thread for `duration`, honouring an optional token.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if the token is (or becomes) cancelled.
pub(crate) fn pause(
    duration: Duration,
    cancel: Option<&CancelToken>,
    url: &str,
) -> Result<(), PipelineError> {
    match cancel {
        Some(token) => {
            if token.sleep(duration) {
                return Err(PipelineError::cancelled(url));
            }
        }
        None => std::thread::sleep(duration),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_new_token_is_not_cancelled() {
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sleep_runs_full_duration_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_sleep_wakes_on_cancel_from_other_thread() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_pause_reports_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let result = pause(Duration::from_secs(10), Some(&token), "https://example.com");
        assert!(matches!(result, Err(PipelineError::Cancelled { .. })));
    }

    #[test]
    fn test_pause_without_token_sleeps() {
        let start = Instant::now();
        pause(Duration::from_millis(20), None, "https://example.com").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
