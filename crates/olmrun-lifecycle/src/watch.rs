//! Completion watcher
//!
//! Polls a predicate until it reports convergence, fails, or the run
//! context ends.

use std::future::Future;
use std::time::Duration;

use tracing::trace;

use olmrun_common::Result;

use crate::context::RunContext;

/// Default interval between predicate evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll `check_fn` until it returns `Ok(true)`.
///
/// The predicate is evaluated immediately, then once per `interval`. An
/// `Err` from the predicate is returned as is, without retrying. When the
/// context's deadline passes the result is `Error::Timeout`; when it is
/// cancelled, `Error::Cancelled`. Both the sleep and the in-flight
/// predicate are raced against the context.
pub async fn poll_until<F, Fut>(
    ctx: &RunContext,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        if ctx.run(description, check_fn()).await? {
            return Ok(());
        }
        trace!(description, "condition not yet met");

        tokio::select! {
            biased;
            err = ctx.done(description) => return Err(err),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
