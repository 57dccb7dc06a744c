// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External collaborator contracts: the narrow capability interfaces the
//! container consumes from the surrounding worker-node subsystems. See
//! spec.md §6 "Outbound collaborator contracts".
//!
//! These are trait objects rather than generic type parameters on
//! `TaskContainer` — the container is constructed once per deployment from
//! whatever concrete collaborators the worker node wires up, and erasing
//! them keeps `TaskContainer` itself non-generic, matching how the teacher's
//! daemon wires concrete adapters behind trait objects at construction time.

use crate::error::{ContainerError, FailureCause};
use crate::state::ExecutionState;
use oj_task_container_core::{ExecutionAttemptId, JobId};
use std::path::PathBuf;

/// Actions the container takes against the worker node hosting it.
pub trait WorkerNodeActions: Send + Sync {
    /// Publish the task's current or final lifecycle state. Called exactly
    /// once with a terminal state, as the last observable action before the
    /// metric group closes (spec.md §7 "User-visible behavior").
    fn update_task_execution_state(&self, state: ExecutionState, cause: Option<FailureCause>);

    /// Report a condition severe enough that the process should halt.
    fn notify_fatal_error(&self, message: &str, cause: Option<FailureCause>);
}

/// Collaborator that receives declined checkpoint notifications.
pub trait CheckpointResponder: Send + Sync {
    fn decline_checkpoint(
        &self,
        job_id: &JobId,
        execution_attempt_id: &ExecutionAttemptId,
        checkpoint_id: u64,
        reason: &str,
    );
}

/// Memory allocations made on behalf of the operator instance, released as
/// one unit during cleanup (spec.md §4.2 step 5).
pub trait MemoryManager: Send + Sync {
    fn release_all(&self, owner: &ExecutionAttemptId);
}

/// User-code class loading / library cache.
pub trait LibraryCache: Send + Sync {
    fn register_task(&self, job_id: &JobId) -> Result<(), String>;

    /// Resolve (and possibly download) the class loader for this job's
    /// user code. May block; called only from bootstrap.
    fn get_classloader(&self, job_id: &JobId) -> Result<ClassLoaderHandle, String>;

    fn unregister_task(&self, job_id: &JobId);
}

/// Opaque handle to a resolved user-code class loader. Threaded explicitly
/// through the environment rather than relied upon via thread-local state,
/// per spec.md §9 "do not rely on thread-local global state".
#[derive(Debug, Clone)]
pub struct ClassLoaderHandle {
    pub descriptor: String,
}

/// Permanent BLOB service: job-scoped artifact registration.
pub trait BlobService: Send + Sync {
    fn register_job(&self, job_id: &JobId) -> Result<(), String>;
    fn release_job(&self, job_id: &JobId);
}

/// Distributed file cache backing distributed-cache entries.
pub trait FileCache: Send + Sync {
    /// Schedule a background copy. Returns a join handle the bootstrap
    /// phase collects and waits on (spec.md §4.3 step 7).
    fn create_tmp_file(
        &self,
        entry_name: &str,
        job_id: &JobId,
        execution_attempt_id: &ExecutionAttemptId,
    ) -> std::thread::JoinHandle<Result<PathBuf, String>>;

    fn release_job(&self, job_id: &JobId, execution_attempt_id: &ExecutionAttemptId);
}

/// One produced (outbound) data partition.
pub trait ProducedPartition: Send + Sync {
    fn partition_id(&self) -> &str;
    fn setup(&self) -> Result<(), String>;
    /// Signal downstream consumers that the producer failed.
    fn fail(&self, cause: &FailureCause);
    fn finish(&self);
    fn close(&self);
}

/// One input (inbound) gate.
pub trait InputGate: Send + Sync {
    fn setup(&self) -> Result<(), String>;
    fn close(&self);
}

/// Registers/unregisters produced partitions with the shuffle environment's
/// event dispatcher.
pub trait EventDispatcher: Send + Sync {
    fn register(&self, partition_id: &str);
    fn unregister(&self, partition_id: &str);
}

/// Network subsystem factory: builds the produced partitions and input
/// gates named in the deployment descriptor. The core does not parse that
/// descriptor (out of scope per spec.md §1); it receives already-resolved
/// specs from the worker node and only drives setup/teardown.
pub trait NetworkEnvironment: Send + Sync {
    fn create_produced_partitions(&self) -> Vec<Box<dyn ProducedPartition>>;
    fn create_input_gates(&self) -> Vec<Box<dyn InputGate>>;
}

/// Answers "what state is the producer of this partition in" queries
/// forwarded from downstream consumers (spec.md §4.6).
pub trait PartitionStateChecker: Send + Sync {
    fn request_partition_producer_state(
        &self,
        intermediate_dataset_id: &str,
        partition_id: &str,
    ) -> Result<ExecutionState, ContainerError>;
}

/// Receives checkpoint-complete acknowledgements on behalf of the
/// task-state manager (distinct from the operator's own
/// `notify_checkpoint_complete` hook).
pub trait TaskStateManager: Send + Sync {
    fn notify_checkpoint_complete(&self, checkpoint_id: u64);
}

/// Facade over the metric registry's per-task group. Closed last during
/// cleanup (spec.md §4.2 step 9).
pub trait MetricGroup: Send + Sync {
    fn close(&self);
}

impl<T: WorkerNodeActions + ?Sized> WorkerNodeActions for std::sync::Arc<T> {
    fn update_task_execution_state(&self, state: ExecutionState, cause: Option<FailureCause>) {
        (**self).update_task_execution_state(state, cause)
    }

    fn notify_fatal_error(&self, message: &str, cause: Option<FailureCause>) {
        (**self).notify_fatal_error(message, cause)
    }
}

impl<T: CheckpointResponder + ?Sized> CheckpointResponder for std::sync::Arc<T> {
    fn decline_checkpoint(
        &self,
        job_id: &JobId,
        execution_attempt_id: &ExecutionAttemptId,
        checkpoint_id: u64,
        reason: &str,
    ) {
        (**self).decline_checkpoint(job_id, execution_attempt_id, checkpoint_id, reason)
    }
}

impl<T: TaskStateManager + ?Sized> TaskStateManager for std::sync::Arc<T> {
    fn notify_checkpoint_complete(&self, checkpoint_id: u64) {
        (**self).notify_checkpoint_complete(checkpoint_id)
    }
}

/// Everything bootstrap needs to construct and wire the operator
/// (spec.md §4.3 step 9, "operator environment object"). Bundled into one
/// struct passed to the operator factory rather than threading a dozen
/// collaborator references individually.
pub struct OperatorEnvironment {
    pub job_id: JobId,
    pub execution_attempt_id: ExecutionAttemptId,
    pub subtask_index: usize,
    pub class_loader: ClassLoaderHandle,
    pub distributed_cache_files: Vec<(String, PathBuf)>,
}
