// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles for every outbound collaborator contract, plus a builder
//! that assembles a [`TaskContainer`] wired to all of them. Shared by this
//! crate's internal `#[cfg(test)]` modules and by the workspace's end-to-end
//! scenario tests in `tests/`. Mirrors `oj_core::test_support`'s role as the
//! one place fixture builders live.

#![cfg(any(test, feature = "test-support"))]

use crate::config::ExecutionConfigOverrides;
use crate::contracts::{
    BlobService, CheckpointResponder, ClassLoaderHandle, EventDispatcher, FileCache, InputGate,
    LibraryCache, MemoryManager, NetworkEnvironment, PartitionStateChecker, ProducedPartition,
    TaskStateManager, WorkerNodeActions,
};
use crate::container::{Collaborators, OperatorFactory, TaskContainer};
use crate::error::{ContainerError, FailureCause, OperatorError};
use crate::invokable::Operator;
use crate::metrics::AtomicMetricGroup;
use crate::state::ExecutionState;
use oj_task_container_core::{ExecutionAttemptId, FakeClock, JobId, TaskIdentity};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// Records every `update_task_execution_state` / `notify_fatal_error` call
/// so scenario tests can assert on the exact terminal publication.
#[derive(Default)]
pub struct RecordingWorkerNode {
    pub states: Mutex<Vec<(ExecutionState, Option<FailureCause>)>>,
    pub fatal_errors: Mutex<Vec<String>>,
}

impl RecordingWorkerNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn final_state(&self) -> Option<(ExecutionState, Option<FailureCause>)> {
        self.states.lock().last().cloned()
    }

    pub fn fatal_error_count(&self) -> usize {
        self.fatal_errors.lock().len()
    }
}

impl WorkerNodeActions for RecordingWorkerNode {
    fn update_task_execution_state(&self, state: ExecutionState, cause: Option<FailureCause>) {
        self.states.lock().push((state, cause));
    }

    fn notify_fatal_error(&self, message: &str, _cause: Option<FailureCause>) {
        self.fatal_errors.lock().push(message.to_string());
    }
}

/// Records declined checkpoints.
#[derive(Default)]
pub struct RecordingCheckpointResponder {
    pub declines: Mutex<Vec<(u64, String)>>,
}

impl RecordingCheckpointResponder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl CheckpointResponder for RecordingCheckpointResponder {
    fn decline_checkpoint(
        &self,
        _job_id: &JobId,
        _execution_attempt_id: &ExecutionAttemptId,
        checkpoint_id: u64,
        reason: &str,
    ) {
        self.declines.lock().push((checkpoint_id, reason.to_string()));
    }
}

pub struct NoopMemoryManager;
impl MemoryManager for NoopMemoryManager {
    fn release_all(&self, _owner: &ExecutionAttemptId) {}
}

/// Library cache stub: always resolves immediately, optionally failing on
/// request for bootstrap-failure scenario tests.
pub struct StubLibraryCache {
    pub fail: bool,
}

impl LibraryCache for StubLibraryCache {
    fn register_task(&self, _job_id: &JobId) -> Result<(), String> {
        Ok(())
    }

    fn get_classloader(&self, _job_id: &JobId) -> Result<ClassLoaderHandle, String> {
        if self.fail {
            Err("class load failure (stub)".to_string())
        } else {
            Ok(ClassLoaderHandle { descriptor: "stub-classloader".to_string() })
        }
    }

    fn unregister_task(&self, _job_id: &JobId) {}
}

pub struct NoopBlobService;
impl BlobService for NoopBlobService {
    fn register_job(&self, _job_id: &JobId) -> Result<(), String> {
        Ok(())
    }

    fn release_job(&self, _job_id: &JobId) {}
}

pub struct NoopFileCache;
impl FileCache for NoopFileCache {
    fn create_tmp_file(
        &self,
        entry_name: &str,
        _job_id: &JobId,
        _execution_attempt_id: &ExecutionAttemptId,
    ) -> std::thread::JoinHandle<Result<PathBuf, String>> {
        let entry_name = entry_name.to_string();
        std::thread::spawn(move || Ok(PathBuf::from(format!("/tmp/{entry_name}"))))
    }

    fn release_job(&self, _job_id: &JobId, _execution_attempt_id: &ExecutionAttemptId) {}
}

/// Records setup/fail/finish/close calls so tests can assert exactly-once
/// release (invariant I4) and correct fail-signaling on cancel/fail paths.
pub struct RecordingPartition {
    pub id: String,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl ProducedPartition for RecordingPartition {
    fn partition_id(&self) -> &str {
        &self.id
    }

    fn setup(&self) -> Result<(), String> {
        self.events.lock().push(format!("{}:setup", self.id));
        Ok(())
    }

    fn fail(&self, cause: &FailureCause) {
        self.events.lock().push(format!("{}:fail:{}", self.id, cause));
    }

    fn finish(&self) {
        self.events.lock().push(format!("{}:finish", self.id));
    }

    fn close(&self) {
        self.events.lock().push(format!("{}:close", self.id));
    }
}

pub struct RecordingGate {
    pub id: String,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl InputGate for RecordingGate {
    fn setup(&self) -> Result<(), String> {
        self.events.lock().push(format!("gate-{}:setup", self.id));
        Ok(())
    }

    fn close(&self) {
        self.events.lock().push(format!("gate-{}:close", self.id));
    }
}

pub struct NoopEventDispatcher {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl EventDispatcher for NoopEventDispatcher {
    fn register(&self, partition_id: &str) {
        self.events.lock().push(format!("dispatcher:register:{partition_id}"));
    }

    fn unregister(&self, partition_id: &str) {
        self.events.lock().push(format!("dispatcher:unregister:{partition_id}"));
    }
}

/// Network stub producing a fixed number of recording partitions/gates that
/// all funnel their lifecycle events into one shared log.
pub struct StubNetworkEnvironment {
    pub partition_count: usize,
    pub gate_count: usize,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl NetworkEnvironment for StubNetworkEnvironment {
    fn create_produced_partitions(&self) -> Vec<Box<dyn ProducedPartition>> {
        (0..self.partition_count)
            .map(|i| {
                Box::new(RecordingPartition { id: format!("p{i}"), events: Arc::clone(&self.events) })
                    as Box<dyn ProducedPartition>
            })
            .collect()
    }

    fn create_input_gates(&self) -> Vec<Box<dyn InputGate>> {
        (0..self.gate_count)
            .map(|i| {
                Box::new(RecordingGate { id: format!("g{i}"), events: Arc::clone(&self.events) })
                    as Box<dyn InputGate>
            })
            .collect()
    }
}

pub struct StubPartitionStateChecker {
    pub result: ExecutionState,
}

impl PartitionStateChecker for StubPartitionStateChecker {
    fn request_partition_producer_state(
        &self,
        _intermediate_dataset_id: &str,
        _partition_id: &str,
    ) -> Result<ExecutionState, ContainerError> {
        Ok(self.result)
    }
}

#[derive(Default)]
pub struct RecordingTaskStateManager {
    pub completed: Mutex<Vec<u64>>,
}

impl RecordingTaskStateManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TaskStateManager for RecordingTaskStateManager {
    fn notify_checkpoint_complete(&self, checkpoint_id: u64) {
        self.completed.lock().push(checkpoint_id);
    }
}

/// Operator that finishes `invoke` immediately without ever looking at its
/// cancellation state. Covers the happy-path scenario (spec.md §8 scenario 1).
#[derive(Default)]
pub struct ImmediateOperator {
    pub invokes: Arc<AtomicUsize>,
    pub cancels: Arc<AtomicUsize>,
}

impl ImmediateOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operator for ImmediateOperator {
    fn invoke(&self) -> Result<(), OperatorError> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&self) -> Result<(), OperatorError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Operator whose `invoke` fails immediately, for exceptional-exit scenarios.
pub struct FailingOperator {
    pub message: String,
}

impl Operator for FailingOperator {
    fn invoke(&self) -> Result<(), OperatorError> {
        Err(OperatorError::new(self.message.clone()))
    }

    fn cancel(&self) -> Result<(), OperatorError> {
        Ok(())
    }
}

/// Operator that polls its own cancellation flag and returns as soon as it
/// observes one, simulating well-behaved user code (spec.md §8 scenario 3).
#[derive(Default)]
pub struct CooperativeOperator {
    pub invokes: Arc<AtomicUsize>,
    pub cancels: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicBool>,
}

impl CooperativeOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operator for CooperativeOperator {
    fn invoke(&self) -> Result<(), OperatorError> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        while !self.cancelled.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), OperatorError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Operator that ignores `cancel()` entirely and blocks in `invoke` until the
/// test releases it over a channel, simulating uncooperative user code that
/// only the watchdog can bound (spec.md §8 scenario 4).
pub struct StuckOperator {
    pub invokes: Arc<AtomicUsize>,
    pub cancels: Arc<AtomicUsize>,
    pub release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl StuckOperator {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self { invokes: Arc::new(AtomicUsize::new(0)), cancels: Arc::new(AtomicUsize::new(0)), release: Mutex::new(Some(rx)) },
            tx,
        )
    }
}

impl Operator for StuckOperator {
    fn invoke(&self) -> Result<(), OperatorError> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        if let Some(rx) = self.release.lock().take() {
            let _ = rx.recv();
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), OperatorError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn should_interrupt_on_cancel(&self) -> bool {
        true
    }
}

/// Operator recording every checkpoint trigger/complete it sees, for the
/// Async Call Dispatcher scenario tests (spec.md §8 scenario 6). Blocks in
/// `invoke` until released over a channel, so tests can drive checkpoint
/// traffic while the task is still RUNNING.
#[derive(Default)]
pub struct CheckpointingOperator {
    pub invokes: Arc<AtomicUsize>,
    pub triggered: Mutex<Vec<u64>>,
    pub completed: Mutex<Vec<u64>>,
    pub accept_triggers: bool,
    pub release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl CheckpointingOperator {
    pub fn new(accept_triggers: bool) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                invokes: Arc::new(AtomicUsize::new(0)),
                triggered: Mutex::new(Vec::new()),
                completed: Mutex::new(Vec::new()),
                accept_triggers,
                release: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl Operator for CheckpointingOperator {
    fn invoke(&self) -> Result<(), OperatorError> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        if let Some(rx) = self.release.lock().take() {
            let _ = rx.recv();
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), OperatorError> {
        Ok(())
    }

    fn trigger_checkpoint(&self, checkpoint_id: u64) -> Result<bool, OperatorError> {
        self.triggered.lock().push(checkpoint_id);
        Ok(self.accept_triggers)
    }

    fn notify_checkpoint_complete(&self, checkpoint_id: u64) -> Result<(), OperatorError> {
        self.completed.lock().push(checkpoint_id);
        Ok(())
    }
}

/// Waits up to `timeout` for `predicate` to become true, polling every 5ms.
/// Scenario tests need this since the driver and cancellation triad run on
/// background threads: there is no join handle to wait on directly.
pub fn wait_until(mut predicate: impl FnMut() -> bool, timeout: std::time::Duration) -> bool {
    let start = std::time::Instant::now();
    while !predicate() {
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    true
}

/// Everything a scenario test might want to inspect after the container
/// runs, bundled so `build_container` can return one value.
pub struct Fixture {
    pub worker_node: Arc<RecordingWorkerNode>,
    pub checkpoint_responder: Arc<RecordingCheckpointResponder>,
    pub task_state_manager: Arc<RecordingTaskStateManager>,
    pub network_events: Arc<Mutex<Vec<String>>>,
    pub metric_group: Arc<AtomicMetricGroup>,
}

/// Assemble a [`TaskContainer<FakeClock>`] with every collaborator stubbed,
/// using `operator_factory` to construct the user operator. `fail_classloader`
/// simulates a bootstrap-time class-load failure for scenario 5.
pub fn build_container(
    operator_factory: OperatorFactory,
    partition_count: usize,
    gate_count: usize,
    fail_classloader: bool,
    overrides: ExecutionConfigOverrides,
) -> (TaskContainer<FakeClock>, Fixture) {
    let identity = TaskIdentity::builder().build();
    let clock = FakeClock::new();
    let worker_node = RecordingWorkerNode::new();
    let checkpoint_responder = RecordingCheckpointResponder::new();
    let task_state_manager = RecordingTaskStateManager::new();
    let network_events = Arc::new(Mutex::new(Vec::new()));
    let metric_group = Arc::new(AtomicMetricGroup::new());

    let collaborators = Collaborators {
        worker_node: Box::new(Arc::clone(&worker_node)) as Box<dyn WorkerNodeActions>,
        checkpoint_responder: Box::new(Arc::clone(&checkpoint_responder)) as Box<dyn CheckpointResponder>,
        memory_manager: Box::new(NoopMemoryManager),
        library_cache: Box::new(StubLibraryCache { fail: fail_classloader }),
        blob_service: Box::new(NoopBlobService),
        file_cache: Box::new(NoopFileCache),
        network: Box::new(StubNetworkEnvironment {
            partition_count,
            gate_count,
            events: Arc::clone(&network_events),
        }),
        event_dispatcher: Box::new(NoopEventDispatcher { events: Arc::clone(&network_events) }),
        partition_state_checker: Box::new(StubPartitionStateChecker { result: ExecutionState::Running }),
        task_state_manager: Box::new(Arc::clone(&task_state_manager)) as Box<dyn TaskStateManager>,
        metric_group: Arc::clone(&metric_group),
    };

    let container = TaskContainer::new(identity, clock, overrides, collaborators, operator_factory, Vec::new());

    (container, Fixture { worker_node, checkpoint_responder, task_state_manager, network_events, metric_group })
}
