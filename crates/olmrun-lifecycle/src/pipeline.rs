//! Validate, mutate, watch
//!
//! Install and uninstall share one shape:
//!
//! ```text
//! Init -> Validating -> Mutating -> Watching -> {Succeeded, Failed, TimedOut}
//! ```
//!
//! An `Operation` supplies the steps and `Pipeline::drive` runs them in
//! order against a `RunContext`. A validation error never reaches
//! `Mutating`; mutation is not transactional and stops at the first error.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use olmrun_common::Result;

use crate::context::RunContext;
use crate::watch::{poll_until, DEFAULT_POLL_INTERVAL};

/// Pipeline phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Init,
    /// Reading inputs and cluster state; no writes
    Validating,
    /// Creating or deleting objects
    Mutating,
    /// Polling for convergence
    Watching,
    /// Converged and finished
    Succeeded,
    /// Stopped on an error
    Failed,
    /// Stopped because the context ended
    TimedOut,
}

impl Phase {
    /// Whether the pipeline has stopped
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "Init",
            Self::Validating => "Validating",
            Self::Mutating => "Mutating",
            Self::Watching => "Watching",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(s)
    }
}

/// Steps of one install or uninstall
#[async_trait]
pub trait Operation: Send + Sync {
    /// What validation resolved and mutation acts on
    type Plan: Send + Sync;
    /// Result of a successful run
    type Output: Send;

    /// Short name for logs and errors (`install`, `uninstall`)
    fn name(&self) -> &str;

    /// Check inputs and cluster state, without writing
    async fn validate(&self, ctx: &RunContext) -> Result<Self::Plan>;

    /// Apply the plan
    async fn mutate(&self, ctx: &RunContext, plan: &Self::Plan) -> Result<()>;

    /// Description of the condition `converged` checks
    fn convergence(&self, plan: &Self::Plan) -> String;

    /// Whether the cluster has reached the planned state
    async fn converged(&self, ctx: &RunContext, plan: &Self::Plan) -> Result<bool>;

    /// Produce the output once converged
    async fn finish(&self, ctx: &RunContext, plan: Self::Plan) -> Result<Self::Output>;
}

/// Runs an `Operation` and records its phase transitions
#[derive(Debug)]
pub struct Pipeline {
    interval: Duration,
    transitions: Vec<Phase>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Pipeline {
    /// Pipeline polling every `interval` while watching
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            transitions: vec![Phase::Init],
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.transitions.last().copied().unwrap_or(Phase::Init)
    }

    /// Every phase entered so far, starting with `Init`
    pub fn transitions(&self) -> &[Phase] {
        &self.transitions
    }

    /// Drive `op` to a terminal phase
    pub async fn drive<O: Operation>(&mut self, op: &O, ctx: &RunContext) -> Result<O::Output> {
        let result = self.run_steps(op, ctx).await;
        match &result {
            Ok(_) => self.enter(op, Phase::Succeeded),
            Err(e) if e.is_timeout() => {
                self.enter(op, Phase::TimedOut);
                warn!(operation = op.name(), error = %e, "operation did not converge in time");
            }
            Err(e) => {
                self.enter(op, Phase::Failed);
                warn!(
                    operation = op.name(),
                    package = e.package(),
                    kind = e.kind(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "operation failed"
                );
            }
        }
        result
    }

    async fn run_steps<O: Operation>(&mut self, op: &O, ctx: &RunContext) -> Result<O::Output> {
        self.enter(op, Phase::Validating);
        ctx.check(op.name())?;
        let plan = op.validate(ctx).await?;

        self.enter(op, Phase::Mutating);
        op.mutate(ctx, &plan).await?;

        self.enter(op, Phase::Watching);
        let description = op.convergence(&plan);
        let planned = &plan;
        poll_until(ctx, self.interval, &description, || op.converged(ctx, planned)).await?;

        op.finish(ctx, plan).await
    }

    fn enter<O: Operation>(&mut self, op: &O, phase: Phase) {
        let from = self.phase();
        self.transitions.push(phase);
        if phase.is_terminal() {
            info!(operation = op.name(), %from, to = %phase, "phase transition");
        } else {
            debug!(operation = op.name(), %from, to = %phase, "phase transition");
        }
    }
}
