// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Async Call Dispatcher: serializes checkpoint-trigger and
//! checkpoint-complete notifications onto dedicated worker threads so the
//! Execution Driver thread is never blocked by them. See spec.md §4.5.
//!
//! Two long-lived `std::thread`s read from unbounded channels rather than a
//! tokio runtime, keeping the dispatcher's concurrency model uniform with
//! the rest of the container (preemptive OS threads, spec.md §5) instead of
//! nesting an async runtime inside a thread-per-task design. The second
//! thread is the "one extra slot for a blocking call" from spec.md §4.5, so
//! a synchronous checkpoint trigger never head-of-line-blocks a
//! concurrently arriving checkpoint-complete notification.

use crate::container::Shared;
use crate::error::{DispatchError, OperatorError};
use crate::state::ExecutionState;
use oj_task_container_core::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Lazily created on the first checkpoint-related call; shut down (not
/// drained) by the cleanup path (spec.md §4.5, ledger step 2).
pub(crate) struct AsyncCallDispatcher {
    shutdown: Arc<AtomicBool>,
    general: Option<mpsc::Sender<Job>>,
    blocking: Option<mpsc::Sender<Job>>,
}

impl AsyncCallDispatcher {
    fn new(thread_prefix: &str) -> Result<Self, DispatchError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (general_tx, general_rx) = mpsc::channel::<Job>();
        let (blocking_tx, blocking_rx) = mpsc::channel::<Job>();
        spawn_worker(format!("{thread_prefix}-async-calls"), general_rx, Arc::clone(&shutdown))?;
        spawn_worker(format!("{thread_prefix}-async-calls-blocking"), blocking_rx, Arc::clone(&shutdown))?;
        Ok(Self { shutdown, general: Some(general_tx), blocking: Some(blocking_tx) })
    }

    fn submit(&self, job: Job, blocking: bool) -> Result<(), DispatchError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        let sender = if blocking { self.blocking.as_ref() } else { self.general.as_ref() };
        match sender {
            Some(tx) => tx.send(job).map_err(|_| DispatchError::ShuttingDown),
            None => Err(DispatchError::ShuttingDown),
        }
    }

    /// Non-blocking: drops both senders and flips the shutdown flag. Worker
    /// threads discard anything still queued the next time they wake rather
    /// than draining it (spec.md §4.5).
    pub(crate) fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.general = None;
        self.blocking = None;
    }
}

fn spawn_worker(name: String, rx: mpsc::Receiver<Job>, shutdown: Arc<AtomicBool>) -> Result<(), DispatchError> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            for job in rx {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                job();
            }
        })
        .map(|_| ())
        .map_err(DispatchError::from)
}

fn with_dispatcher<C: Clock>(shared: &Arc<Shared<C>>, job: Job, blocking: bool) -> Result<(), DispatchError> {
    let mut guard = shared.dispatcher.lock();
    if guard.is_none() {
        *guard = Some(AsyncCallDispatcher::new(&shared.identity.thread_name())?);
    }
    match guard.as_ref() {
        Some(dispatcher) => dispatcher.submit(job, blocking),
        None => Err(DispatchError::ShuttingDown),
    }
}

/// Report a submission failure the way spec.md §4.5 prescribes: silently
/// ignored once the task has left RUNNING (the dispatcher was shut down as
/// part of ordinary cleanup), escalated as a genuine fault otherwise.
fn report_submit_failure<C: Clock>(shared: &Arc<Shared<C>>, err: DispatchError) -> Result<(), DispatchError> {
    if shared.state.get() == ExecutionState::Running {
        tracing::error!(job_id = %shared.identity.job_id, error = %err, "async call dispatcher rejected submission while RUNNING");
        Err(err)
    } else {
        tracing::debug!(job_id = %shared.identity.job_id, "async call dispatcher submission dropped after task left RUNNING");
        Ok(())
    }
}

fn decline<C: Clock>(shared: &Arc<Shared<C>>, checkpoint_id: u64, reason: &str) {
    shared.collaborators.checkpoint_responder.decline_checkpoint(
        &shared.identity.job_id,
        &shared.identity.execution_attempt_id,
        checkpoint_id,
        reason,
    );
}

fn escalate_if_running<C: Clock>(shared: &Arc<Shared<C>>, err: OperatorError) {
    if shared.state.get() == ExecutionState::Running {
        crate::cancel::request_fail_externally(shared, (&err).into());
    } else {
        tracing::debug!(
            job_id = %shared.identity.job_id,
            error = %err,
            "operator error observed after task left RUNNING, logging only",
        );
    }
}

/// Ingress for a checkpoint barrier (spec.md §4.5 `trigger-checkpoint`).
/// Never blocks on the operator: the actual call happens on a dispatcher
/// worker thread.
pub(crate) fn trigger_checkpoint<C: Clock>(
    shared: &Arc<Shared<C>>,
    checkpoint_id: u64,
    timestamp: i64,
    synchronous: bool,
) -> Result<(), DispatchError> {
    let _ = timestamp;
    if shared.state.get() != ExecutionState::Running || !shared.invokable.has_operator() {
        tracing::debug!(
            job_id = %shared.identity.job_id,
            checkpoint_id,
            "trigger-checkpoint ignored, task not RUNNING or operator not live",
        );
        return Ok(());
    }

    let task = Arc::clone(shared);
    let safety_net = shared.safety_net.lock().clone();
    let job: Job = Box::new(move || {
        let _scope = safety_net.as_ref().map(|net| net.enter_scope());
        match task.invokable.trigger_checkpoint(checkpoint_id) {
            Ok(true) => {
                task.collaborators.metric_group.inc_checkpoints_triggered();
            }
            Ok(false) => {
                task.collaborators.metric_group.inc_checkpoints_declined();
                decline(&task, checkpoint_id, "task not ready");
            }
            Err(err) => {
                task.collaborators.metric_group.inc_checkpoints_declined();
                decline(&task, checkpoint_id, &err.to_string());
                escalate_if_running(&task, err);
            }
        }
    });

    with_dispatcher::<C>(shared, job, synchronous).or_else(|err| report_submit_failure(shared, err))
}

/// Ingress for a checkpoint-complete notification (spec.md §4.5
/// `notify-checkpoint-complete`). Always submitted to the non-blocking slot.
pub(crate) fn notify_checkpoint_complete<C: Clock>(
    shared: &Arc<Shared<C>>,
    checkpoint_id: u64,
) -> Result<(), DispatchError> {
    if shared.state.get() != ExecutionState::Running || !shared.invokable.has_operator() {
        tracing::debug!(
            job_id = %shared.identity.job_id,
            checkpoint_id,
            "notify-checkpoint-complete ignored, task not RUNNING or operator not live",
        );
        return Ok(());
    }

    let task = Arc::clone(shared);
    let safety_net = shared.safety_net.lock().clone();
    let job: Job = Box::new(move || {
        let _scope = safety_net.as_ref().map(|net| net.enter_scope());
        match task.invokable.notify_checkpoint_complete(checkpoint_id) {
            Ok(()) => {
                task.collaborators.metric_group.inc_checkpoints_completed();
                task.collaborators.task_state_manager.notify_checkpoint_complete(checkpoint_id);
            }
            Err(err) => escalate_if_running(&task, err),
        }
    });

    with_dispatcher::<C>(shared, job, false).or_else(|err| report_submit_failure(shared, err))
}

/// Submit an arbitrary job onto the dispatcher. Used by the Partition
/// Producer State Responder (spec.md §4.6) to run a collaborator query off
/// the caller's thread, the same way checkpoint triggers are run off the
/// Execution Driver thread.
pub(crate) fn submit<C: Clock>(shared: &Arc<Shared<C>>, job: Job, blocking: bool) -> Result<(), DispatchError> {
    with_dispatcher(shared, job, blocking)
}

/// Shut down the dispatcher during cleanup, if one was ever created
/// (spec.md §4.2 step 2).
pub(crate) fn shutdown<C: Clock>(shared: &Shared<C>) {
    if let Some(dispatcher) = shared.dispatcher.lock().as_mut() {
        dispatcher.shutdown();
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
