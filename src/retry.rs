//! Bounded retry for flaky operations.
//!
//! Checkouts and clones run under a small constant-interval retrier; the
//! control-plane client uses an exponential one. Two rules matter more
//! than the arithmetic: cancellation aborts a back-off sleep immediately,
//! and a caller-supplied predicate can declare an error unretryable so a
//! corrupt-state wipe is not wasted on, say, a bad ref name.

use std::future::Future;
use std::time::Duration;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Constant(Duration),
    Exponential { base: Duration, max: Duration },
}

/// Runs an async operation up to `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct Retrier {
    max_attempts: u32,
    strategy: Strategy,
}

impl Retrier {
    /// Fixed interval between attempts.
    pub fn constant(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy: Strategy::Constant(interval),
        }
    }

    /// Doubling interval, capped at `max`.
    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy: Strategy::Exponential { base, max },
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            Strategy::Constant(d) => d,
            Strategy::Exponential { base, max } => {
                let pow = attempt.saturating_sub(1).min(16);
                base.saturating_mul(2_u32.saturating_pow(pow)).min(max)
            }
        }
    }

    /// Retry everything until attempts run out.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancelToken, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_break(cancel, |_| false, op).await
    }

    /// Retry, but stop as soon as `break_early` says the error is not
    /// worth another attempt. Cancellation always stops the loop and
    /// returns the last error.
    pub async fn run_with_break<T, E, F, Fut>(
        &self,
        cancel: &CancelToken,
        break_early: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_attempts || break_early(&e) || cancel.is_cancelled() {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(e),
                    }
                    attempt += 1;
                }
            }
        }
    }
}
