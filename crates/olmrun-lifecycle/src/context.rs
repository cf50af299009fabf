//! Bounded run context
//!
//! A `RunContext` carries the deadline and cancellation token of one
//! install or uninstall. Every API call and every poll sleep is raced
//! against it, so once the deadline passes or the token is cancelled the
//! operation returns promptly and leaves no work running behind it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use olmrun_common::{Error, Result};

/// Default budget for one install or uninstall
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline used when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline and cancellation signal for one operation
#[derive(Clone, Debug)]
pub struct RunContext {
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RunContext {
    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_cancellation(timeout, CancellationToken::new())
    }

    /// Context that expires `timeout` from now or when `token` is cancelled
    ///
    /// A timeout too large to represent (such as `Duration::MAX`) means no
    /// practical deadline.
    pub fn with_cancellation(timeout: Duration, token: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            deadline: now.checked_add(timeout).unwrap_or(now + FAR_FUTURE),
            timeout,
            cancel: token,
        }
    }

    /// Token that cancels this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Return the context's error if it is already done
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::cancelled(operation))
        } else if Instant::now() >= self.deadline {
            Err(Error::timeout(operation, self.timeout))
        } else {
            Ok(())
        }
    }

    /// Resolve once the context is done, yielding the matching error
    pub async fn done(&self, operation: &str) -> Error {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Error::cancelled(operation),
            _ = tokio::time::sleep_until(self.deadline) => Error::timeout(operation, self.timeout),
        }
    }

    /// Run `fut` unless the context finishes first
    ///
    /// The future is dropped (and any in-flight request with it) when the
    /// deadline passes or the context is cancelled.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            err = self.done(operation) => Err(err),
            result = fut => result,
        }
    }
}
