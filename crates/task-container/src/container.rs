// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Task Container: the public entry point assembling the State Cell,
//! Resource Ledger, Invokable Handle, Execution Driver, Cancellation
//! Orchestrator, Async Call Dispatcher, and Partition Producer State
//! Responder into the single composite component described in spec.md §2.

use crate::cancel;
use crate::config::{ExecutionConfigOverrides, TaskContainerConfig};
use crate::contracts::{
    BlobService, CheckpointResponder, EventDispatcher, FileCache, InputGate, LibraryCache,
    MemoryManager, NetworkEnvironment, PartitionStateChecker, ProducedPartition, TaskStateManager,
    WorkerNodeActions,
};
use crate::dispatch::AsyncCallDispatcher;
use crate::error::{DispatchError, FailureCause, OperatorError};
use crate::invokable::InvokableHandle;
use crate::ledger::ResourceLedger;
use crate::metrics::AtomicMetricGroup;
use crate::responder::PartitionProducerStateFuture;
use crate::state::{ExecutionState, StateCell};
use oj_task_container_core::{Clock, SystemClock, TaskIdentity};
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bundle of every external collaborator the container calls outward to
/// (spec.md §6 "Outbound collaborator contracts"). One struct rather than a
/// dozen constructor parameters.
pub struct Collaborators {
    pub worker_node: Box<dyn WorkerNodeActions>,
    pub checkpoint_responder: Box<dyn CheckpointResponder>,
    pub memory_manager: Box<dyn MemoryManager>,
    pub library_cache: Box<dyn LibraryCache>,
    pub blob_service: Box<dyn BlobService>,
    pub file_cache: Box<dyn FileCache>,
    pub network: Box<dyn NetworkEnvironment>,
    pub event_dispatcher: Box<dyn EventDispatcher>,
    pub partition_state_checker: Box<dyn PartitionStateChecker>,
    pub task_state_manager: Box<dyn TaskStateManager>,
    pub metric_group: Arc<AtomicMetricGroup>,
}

/// Constructs the user operator from its environment. Replaces the
/// original's reflective `Class.forName(...).getConstructor(Environment)`
/// with an explicit factory closure supplied at deployment time — the
/// deployment descriptor still names an operator kind as data; the worker
/// node resolves that name to one of these factories (spec.md §9, first
/// design note).
pub type OperatorFactory = Box<
    dyn Fn(&crate::contracts::OperatorEnvironment) -> Result<Arc<dyn crate::invokable::Operator>, OperatorError>
        + Send
        + Sync,
>;

/// All state shared between the container's public handle, the Execution
/// Driver thread, and the cancellation triad's daemon threads. Held behind
/// one `Arc` so every thread can outlive the call that spawned it without
/// the container itself needing to join anything but its own driver thread.
pub(crate) struct Shared<C: Clock> {
    pub identity: Arc<TaskIdentity>,
    pub state: StateCell,
    pub ledger: ResourceLedger,
    pub invokable: Arc<InvokableHandle>,
    pub config: Mutex<TaskContainerConfig>,
    pub clock: C,
    pub collaborators: Collaborators,
    pub operator_factory: OperatorFactory,
    pub distributed_cache_entries: Vec<String>,
    pub partitions: Mutex<Vec<Box<dyn ProducedPartition>>>,
    pub gates: Mutex<Vec<Box<dyn InputGate>>>,
    pub cancellation_token: CancellationToken,
    pub executing_alive: Arc<AtomicBool>,
    pub dispatcher: Mutex<Option<AsyncCallDispatcher>>,
    /// Latch gating the cancellation triad to launch at most once per task
    /// lifetime, independent of the operator-cancel latch in
    /// [`InvokableHandle`] (spec.md §4.4 step 3).
    pub triad_launched: AtomicBool,
    pub safety_net: Mutex<Option<Arc<crate::safety_net::SafetyNet>>>,
}

impl<C: Clock> Shared<C> {
    /// Publish the current state (and cause, if any) to the worker node.
    /// Used both for the RUNNING notification (spec.md §4.3 step 12) and for
    /// the terminal publication in cleanup (spec.md §4.2 step 8) — the
    /// collaborator contract does not distinguish the two.
    pub(crate) fn publish_state(&self) {
        let state = self.state.get();
        let cause = self.state.cause();
        self.collaborators.worker_node.update_task_execution_state(state, cause);
    }
}

/// The per-subtask runtime described in spec.md. Generic over the clock so
/// tests can substitute `FakeClock` for deterministic cancellation-timing
/// assertions; production callers use the default `SystemClock`.
pub struct TaskContainer<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
    driver_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock> TaskContainer<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: TaskIdentity,
        clock: C,
        config_overrides: ExecutionConfigOverrides,
        collaborators: Collaborators,
        operator_factory: OperatorFactory,
        distributed_cache_entries: Vec<String>,
    ) -> Self {
        let identity = Arc::new(identity);
        let shared = Arc::new(Shared {
            state: StateCell::new(Arc::clone(&identity)),
            ledger: ResourceLedger::new(Arc::clone(&identity)),
            invokable: Arc::new(InvokableHandle::empty()),
            config: Mutex::new(TaskContainerConfig::resolve(&config_overrides)),
            clock,
            collaborators,
            operator_factory,
            distributed_cache_entries,
            partitions: Mutex::new(Vec::new()),
            gates: Mutex::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
            executing_alive: Arc::new(AtomicBool::new(false)),
            dispatcher: Mutex::new(None),
            triad_launched: AtomicBool::new(false),
            safety_net: Mutex::new(None),
            identity,
        });
        Self { shared, driver_thread: Mutex::new(None) }
    }

    /// Spawn the dedicated Execution Driver thread. Call once; a second call
    /// is a no-op (logged) rather than spawning a competing thread, since
    /// invariant I2 requires exactly one thread ever runs the operator.
    pub fn start(&self) {
        let mut slot = self.driver_thread.lock();
        if slot.is_some() {
            tracing::warn!(
                job_id = %self.shared.identity.job_id,
                "start() called more than once, ignoring",
            );
            return;
        }
        let driver_shared = Arc::clone(&self.shared);
        let name = self.shared.identity.thread_name();
        match std::thread::Builder::new().name(name).spawn(move || crate::driver::run(driver_shared)) {
            Ok(handle) => *slot = Some(handle),
            Err(err) => {
                tracing::error!(
                    job_id = %self.shared.identity.job_id,
                    error = %err,
                    "failed to spawn task execution driver thread, task will not progress",
                );
            }
        }
    }

    /// Request cooperative cancellation. Non-blocking, idempotent (spec.md
    /// §4.4, §6).
    pub fn cancel(&self) {
        self.shared.collaborators.metric_group.inc_cancel_requests();
        cancel::request_cancel(&self.shared);
    }

    /// Request transition to FAILED with `cause`. Non-blocking, idempotent.
    pub fn fail_externally(&self, cause: FailureCause) {
        cancel::request_fail_externally(&self.shared, cause);
    }

    /// Ingress for a checkpoint barrier. Never blocks on the operator; see
    /// spec.md §4.5.
    pub fn trigger_checkpoint_barrier(
        &self,
        checkpoint_id: u64,
        timestamp: i64,
        synchronous: bool,
    ) -> Result<(), DispatchError> {
        crate::dispatch::trigger_checkpoint(&self.shared, checkpoint_id, timestamp, synchronous)
    }

    /// Ingress for a checkpoint-complete notification. Never blocks.
    pub fn notify_checkpoint_complete(&self, checkpoint_id: u64) -> Result<(), DispatchError> {
        crate::dispatch::notify_checkpoint_complete(&self.shared, checkpoint_id)
    }

    /// Query another subtask's producer state on behalf of a downstream
    /// consumer (spec.md §4.6). Returns immediately with a handle the
    /// caller resolves on its own schedule, rather than blocking the
    /// calling (network) thread.
    pub fn request_partition_producer_state(
        &self,
        intermediate_dataset_id: String,
        partition_id: String,
    ) -> PartitionProducerStateFuture<C> {
        crate::responder::request_partition_producer_state(
            &self.shared,
            intermediate_dataset_id,
            partition_id,
        )
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.state.get()
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        self.shared.state.cause()
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.shared.identity
    }

    pub fn metric_group(&self) -> Arc<AtomicMetricGroup> {
        Arc::clone(&self.shared.collaborators.metric_group)
    }
}
