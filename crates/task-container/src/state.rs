// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The State Cell — the single atomic source of truth for a task's
//! lifecycle state. See spec.md §3 "Execution State" and §4.1.

use crate::error::FailureCause;
use oj_task_container_core::TaskIdentity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The task's lifecycle state. Totally ordered by the transition graph in
/// spec.md §3, not by derived `Ord` — the state cell itself does not enforce
/// the graph; callers supply valid `(expected, new)` pairs (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Created,
    Deploying,
    Running,
    Canceling,
    Finished,
    Canceled,
    Failed,
}

oj_task_container_core::simple_display! {
    ExecutionState {
        Created => "CREATED",
        Deploying => "DEPLOYING",
        Running => "RUNNING",
        Canceling => "CANCELING",
        Finished => "FINISHED",
        Canceled => "CANCELED",
        Failed => "FAILED",
    }
}

impl ExecutionState {
    /// Terminal states are never left (invariant I1).
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Finished | ExecutionState::Canceled | ExecutionState::Failed)
    }
}

/// Guards both the lifecycle state and the failure cause behind a single
/// lock so a FAILED transition and its cause are never observed torn
/// (invariant I6). The lock is only ever held for the instant of a
/// compare-and-swap — never across a callback into collaborator or user
/// code.
pub struct StateCell {
    identity: Arc<TaskIdentity>,
    inner: Mutex<(ExecutionState, Option<FailureCause>)>,
}

impl StateCell {
    pub fn new(identity: Arc<TaskIdentity>) -> Self {
        Self { identity, inner: Mutex::new((ExecutionState::Created, None)) }
    }

    /// Current state. Acquire-ordered with respect to any prior successful
    /// transition (spec.md §5 "Ordering guarantees").
    pub fn get(&self) -> ExecutionState {
        self.inner.lock().0
    }

    /// Current failure cause, if the task is FAILED (or raced into FAILED
    /// and back out is impossible by I1, so once set it is permanent).
    pub fn cause(&self) -> Option<FailureCause> {
        self.inner.lock().1.clone()
    }

    /// Compare-and-set the state. On success when `new == Failed`, `cause`
    /// is recorded atomically with the transition (never set without it,
    /// per I6). Returns `true` iff the swap happened; a `false` return means
    /// another actor already transitioned and the caller must re-read and
    /// decide, exactly as spec.md §4.1 describes.
    pub fn try_transition(
        &self,
        expected: ExecutionState,
        new: ExecutionState,
        cause: Option<FailureCause>,
    ) -> bool {
        let mut guard = self.inner.lock();
        if guard.0 != expected {
            return false;
        }
        debug_assert!(
            !guard.0.is_terminal(),
            "attempted to leave terminal state {} for {}",
            guard.0,
            new
        );
        let old = guard.0;
        guard.0 = new;
        if new == ExecutionState::Failed {
            guard.1 = cause;
        }
        drop(guard);

        tracing::info!(
            job_id = %self.identity.job_id,
            job_vertex_id = %self.identity.job_vertex_id,
            subtask_index = self.identity.subtask_index,
            attempt_number = self.identity.attempt_number,
            from = %old,
            to = %new,
            "task state transition",
        );
        true
    }
}
