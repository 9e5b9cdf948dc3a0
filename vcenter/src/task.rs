//! Power task waiting with timeout and cancellation.
//!
//! Power operations return immediately with a task handle. This module polls
//! the handle at a jittered interval until it reaches a terminal state, the
//! timeout elapses, or the caller's cancellation token fires.

use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, VcError};
use crate::session::{PowerTask, Session, TaskInfo, TaskState};

/// Default polling interval for task state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Upper bound of the random jitter added to each poll, as a fraction of the interval.
const JITTER_RATIO: f64 = 0.2;

/// Configuration for task waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskWaitConfig {
    /// Maximum time to wait for a task to finish.
    pub timeout: Duration,
    /// Base interval between polls.
    pub poll_interval: Duration,
}

impl Default for TaskWaitConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TASK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TaskWaitConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Per-operation context passed down the call chain.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub cancel: CancellationToken,
}

impl OpContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with `Cancelled` once the token has fired. Checked before
    /// every platform call so nothing new is issued after cancellation.
    pub fn ensure_active(&self, operation: &str, vm: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(VcError::Cancelled(format!(
                "{} on '{}' not issued",
                operation, vm
            )));
        }
        Ok(())
    }
}

/// Polls power tasks on one session.
pub struct TaskWaiter<'a> {
    session: &'a dyn Session,
    config: &'a TaskWaitConfig,
    ctx: &'a OpContext,
}

impl<'a> TaskWaiter<'a> {
    pub fn new(session: &'a dyn Session, config: &'a TaskWaitConfig, ctx: &'a OpContext) -> Self {
        Self {
            session,
            config,
            ctx,
        }
    }

    /// Wait for `task` to finish. `Ok` only on the success state.
    pub async fn wait(&self, task: &PowerTask) -> Result<TaskInfo> {
        let start = Instant::now();
        let mut last_state = TaskState::Queued;

        loop {
            if self.ctx.is_cancelled() {
                return Err(VcError::Cancelled(format!(
                    "{} on '{}' abandoned in state {}",
                    task.operation, task.vm.name, last_state
                )));
            }

            if start.elapsed() > self.config.timeout {
                tracing::warn!(
                    task = %task.id,
                    operation = task.operation,
                    vm = %task.vm.name,
                    state = %last_state,
                    "Task wait timed out"
                );
                return Err(VcError::Timeout(format!(
                    "{} on '{}' still {} after {:?}",
                    task.operation, task.vm.name, last_state, self.config.timeout
                )));
            }

            let info = self.session.task_info(task).await?;
            tracing::trace!(task = %task.id, state = %info.state, "Polled task");

            if !info.state.is_running() {
                if info.state.is_success() {
                    return Ok(info);
                }
                let message = info
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                tracing::error!(
                    task = %task.id,
                    operation = task.operation,
                    vm = %task.vm.name,
                    "Task failed with error: {}",
                    message
                );
                return Err(VcError::TaskFailed(format!(
                    "{} on '{}': {}",
                    task.operation, task.vm.name, message
                )));
            }

            last_state = info.state;

            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {}
                _ = tokio::time::sleep(jittered(self.config.poll_interval)) => {}
            }
        }
    }
}

fn jittered(interval: Duration) -> Duration {
    let max_jitter = interval.mul_f64(JITTER_RATIO);
    if max_jitter.is_zero() {
        return interval;
    }
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=max_jitter);
    interval + jitter
}
