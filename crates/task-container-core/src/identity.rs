// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task identity — the immutable fields set at container construction.
//!
//! See spec.md §3 "Task Identity".

use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Identifier of the job (dataflow) this task belongs to.
    ///
    /// Assigned by the control plane, not minted here.
    pub struct JobId;
}

crate::define_id! {
    /// Identifier of the job-vertex (operator) this task is an instance of.
    pub struct JobVertexId;
}

crate::define_id! {
    /// Identifier of this specific execution attempt of the subtask.
    pub struct ExecutionAttemptId;
}

crate::define_id! {
    /// Identifier of the slot allocation this task was deployed into.
    pub struct SlotAllocationId;
}

/// Immutable identity of one task execution attempt.
///
/// Constructed once, alongside the container, and never mutated afterward —
/// every log line and every outbound collaborator call carries these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub job_id: JobId,
    pub job_vertex_id: JobVertexId,
    pub execution_attempt_id: ExecutionAttemptId,
    pub slot_allocation_id: SlotAllocationId,
    pub subtask_index: usize,
    pub attempt_number: u32,
    pub task_name: String,
}

impl TaskIdentity {
    pub fn new(
        job_id: JobId,
        job_vertex_id: JobVertexId,
        execution_attempt_id: ExecutionAttemptId,
        slot_allocation_id: SlotAllocationId,
        subtask_index: usize,
        attempt_number: u32,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            job_vertex_id,
            execution_attempt_id,
            slot_allocation_id,
            subtask_index,
            attempt_number,
            task_name: task_name.into(),
        }
    }

    /// Thread name for the dedicated Execution Driver thread.
    ///
    /// `std::thread::Builder::name` panics above 15 bytes on some platforms'
    /// pthread backends, so this is deliberately short and numeric rather
    /// than embedding `task_name`.
    pub fn thread_name(&self) -> String {
        format!("task-{}-{}", self.subtask_index, self.attempt_number)
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} #{}) [{}/{}]",
            self.task_name, self.job_vertex_id, self.subtask_index, self.job_id, self.execution_attempt_id
        )
    }
}

crate::builder! {
    pub struct TaskIdentityBuilder => TaskIdentity {
        into {
            task_name: String = "test-task",
        }
        set {
            job_id: JobId = JobId::from_string("job-test"),
            job_vertex_id: JobVertexId = JobVertexId::from_string("vertex-test"),
            execution_attempt_id: ExecutionAttemptId = ExecutionAttemptId::from_string("attempt-test"),
            slot_allocation_id: SlotAllocationId = SlotAllocationId::from_string("slot-test"),
            subtask_index: usize = 0,
            attempt_number: u32 = 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_all_identity_fields() {
        let identity = TaskIdentity::builder().task_name("map-operator").subtask_index(3).build();
        let rendered = identity.to_string();
        assert!(rendered.contains("map-operator"));
        assert!(rendered.contains("#3"));
    }

    #[test]
    fn thread_name_is_short_and_numeric() {
        let identity = TaskIdentity::builder().subtask_index(2).attempt_number(1).build();
        assert_eq!(identity.thread_name(), "task-2-1");
    }
}
