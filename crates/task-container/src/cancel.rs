// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Cancellation Orchestrator: `cancel()` / `fail_externally()` and the
//! cancellation triad (canceller, interrupter, watchdog) they launch while
//! the task is RUNNING. See spec.md §4.4.

use crate::container::Shared;
use crate::error::FailureCause;
use crate::state::ExecutionState;
use oj_task_container_core::Clock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Request cooperative cancellation. Non-blocking, idempotent (spec.md §4.4).
pub(crate) fn request_cancel<C: Clock>(shared: &Arc<Shared<C>>) {
    request(shared, ExecutionState::Canceling, None);
}

/// Request a transition to FAILED with `cause`. Non-blocking, idempotent.
pub(crate) fn request_fail_externally<C: Clock>(shared: &Arc<Shared<C>>, cause: FailureCause) {
    request(shared, ExecutionState::Failed, Some(cause));
}

/// Common routine backing both `cancel()` and `fail_externally()` (spec.md
/// §4.4 "Both delegate to a common routine").
fn request<C: Clock>(shared: &Arc<Shared<C>>, target: ExecutionState, cause: Option<FailureCause>) {
    loop {
        let current = shared.state.get();
        if current.is_terminal() || current == ExecutionState::Canceling {
            tracing::debug!(
                job_id = %shared.identity.job_id,
                state = %current,
                "cancellation orchestrator: request is a no-op in this state",
            );
            return;
        }

        match current {
            ExecutionState::Created | ExecutionState::Deploying => {
                if shared.state.try_transition(current, target, cause.clone()) {
                    tracing::info!(
                        job_id = %shared.identity.job_id,
                        target = %target,
                        "cancellation orchestrator: drifted pre-bootstrap state, driver will self-abort",
                    );
                    return;
                }
                // lost the race, re-read and retry
            }
            ExecutionState::Running => {
                if shared.state.try_transition(ExecutionState::Running, target, cause.clone()) {
                    launch_triad_if_needed(shared);
                    return;
                }
                // lost the race, re-read and retry
            }
            other => {
                tracing::error!(
                    job_id = %shared.identity.job_id,
                    state = %other,
                    "cancellation orchestrator: unexpected state, programmer error",
                );
                return;
            }
        }
    }
}

/// Launch the cancellation triad exactly once: only if the Invokable Handle
/// is non-null and the once-latch flips from unset to set on this call
/// (spec.md §4.4 step 3, invariant I3).
fn launch_triad_if_needed<C: Clock>(shared: &Arc<Shared<C>>) {
    if !shared.invokable.has_operator() {
        return;
    }
    if shared.triad_launched.swap(true, Ordering::SeqCst) {
        return;
    }

    let config = *shared.config.lock();
    spawn_canceller(shared);
    spawn_interrupter(shared, config.cancellation_interval);
    if let Some(timeout) = config.cancellation_timeout {
        spawn_watchdog(shared, timeout);
    }
}

/// *Canceller thread*: delivers `cancel()` to the operator, then closes
/// network resources so blocked auxiliary threads unblock, then — if the
/// operator opted in — fires one interrupt via the cancellation token.
fn spawn_canceller<C: Clock>(shared: &Arc<Shared<C>>) {
    let worker_shared = Arc::clone(shared);
    let result = std::thread::Builder::new()
        .name(format!("{}-canceller", shared.identity.thread_name()))
        .spawn(move || {
            let shared = worker_shared;
            if let Err(err) = shared.invokable.cancel() {
                tracing::warn!(
                    job_id = %shared.identity.job_id,
                    error = %err,
                    "canceller: operator cancel() hook failed, continuing shutdown",
                );
            }

            for partition in shared.partitions.lock().iter() {
                partition.close();
            }
            for gate in shared.gates.lock().iter() {
                gate.close();
            }

            if shared.invokable.should_interrupt_on_cancel() {
                shared.cancellation_token.cancel();
            }
        });
    if let Err(err) = result {
        tracing::error!(
            job_id = %shared.identity.job_id,
            error = %err,
            "cancellation orchestrator: failed to spawn canceller thread, task may not terminate",
        );
    }
}

/// *Interrupter thread*: sleeps for the cancellation interval, then
/// periodically re-signals the cancellation token and logs the executing
/// thread's liveness while the operator still wants interrupts and the
/// driver thread is alive.
fn spawn_interrupter<C: Clock>(shared: &Arc<Shared<C>>, interval: std::time::Duration) {
    let worker_shared = Arc::clone(shared);
    let result = std::thread::Builder::new()
        .name(format!("{}-interrupter", shared.identity.thread_name()))
        .spawn(move || {
            let shared = worker_shared;
            let started = shared.clock.now();
            loop {
                shared.clock.sleep(interval);
                if !shared.invokable.should_interrupt_on_cancel() {
                    return;
                }
                if !shared.executing_alive.load(Ordering::SeqCst) {
                    return;
                }
                tracing::warn!(
                    job_id = %shared.identity.job_id,
                    thread = %shared.identity.thread_name(),
                    elapsed_ms = elapsed_ms(shared.clock.now(), started),
                    "interrupter: executing thread still alive past cancellation interval, re-signaling",
                );
                shared.cancellation_token.cancel();
            }
        });
    if let Err(err) = result {
        tracing::error!(
            job_id = %shared.identity.job_id,
            error = %err,
            "cancellation orchestrator: failed to spawn interrupter thread, continuing without it",
        );
    }
}

/// *Watchdog thread*: only spawned when a positive cancellation timeout is
/// configured. Escalates to the fatal-error channel if the executing thread
/// is still alive past the deadline.
fn spawn_watchdog<C: Clock>(shared: &Arc<Shared<C>>, timeout: std::time::Duration) {
    let worker_shared = Arc::clone(shared);
    let result = std::thread::Builder::new()
        .name(format!("{}-watchdog", shared.identity.thread_name()))
        .spawn(move || {
            let shared = worker_shared;
            shared.clock.sleep(timeout);
            if shared.executing_alive.load(Ordering::SeqCst) {
                let message = format!(
                    "task {} did not terminate within cancellation-timeout of {:?}",
                    shared.identity, timeout,
                );
                tracing::error!(job_id = %shared.identity.job_id, "{}", message);
                shared.collaborators.worker_node.notify_fatal_error(&message, None);
            }
        });
    if let Err(err) = result {
        tracing::error!(
            job_id = %shared.identity.job_id,
            error = %err,
            "cancellation orchestrator: failed to spawn watchdog thread, stuck operators will not be escalated",
        );
    }
}

fn elapsed_ms(now: Instant, started: Instant) -> u128 {
    now.saturating_duration_since(started).as_millis()
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
