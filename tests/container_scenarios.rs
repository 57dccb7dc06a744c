//! Workspace-level integration tests exercising [`oj_task_container::TaskContainer`]
//! purely through its public API (construction, `start`, `cancel`,
//! `fail_externally`) rather than the crate's internal `#[cfg(test)]` modules.
//!
//! Covers the two spec.md §8 end-to-end scenarios the in-crate unit tests
//! don't already exercise directly: scenario 2 ("immediate external cancel
//! before start") and scenario 5 ("fail-externally during bootstrap").

use oj_task_container::config::ExecutionConfigOverrides;
use oj_task_container::container::{Collaborators, OperatorFactory, TaskContainer};
use oj_task_container::contracts::{
    BlobService, CheckpointResponder, ClassLoaderHandle, EventDispatcher, FileCache, InputGate,
    LibraryCache, MemoryManager, NetworkEnvironment, PartitionStateChecker, ProducedPartition,
    TaskStateManager, WorkerNodeActions,
};
use oj_task_container::error::FailureCause;
use oj_task_container::metrics::AtomicMetricGroup;
use oj_task_container::state::ExecutionState;
use oj_task_container::test_support::{
    wait_until, ImmediateOperator, NoopBlobService, NoopFileCache, RecordingCheckpointResponder,
    RecordingTaskStateManager, RecordingWorkerNode, StubPartitionStateChecker,
};
use oj_task_container_core::{ExecutionAttemptId, FakeClock, JobId, TaskIdentity};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

struct NoopMemoryManager;
impl MemoryManager for NoopMemoryManager {
    fn release_all(&self, _owner: &ExecutionAttemptId) {}
}

struct NoopNetwork;
impl NetworkEnvironment for NoopNetwork {
    fn create_produced_partitions(&self) -> Vec<Box<dyn ProducedPartition>> {
        Vec::new()
    }
    fn create_input_gates(&self) -> Vec<Box<dyn InputGate>> {
        Vec::new()
    }
}

struct NoopEventDispatcher;
impl EventDispatcher for NoopEventDispatcher {
    fn register(&self, _partition_id: &str) {}
    fn unregister(&self, _partition_id: &str) {}
}

/// Library cache whose `get_classloader` counts invocations and blocks until
/// released, so a test can call `fail_externally` while bootstrap is known
/// to be in flight (spec.md §8 scenario 5).
struct GatedLibraryCache {
    resolutions: Arc<AtomicUsize>,
    release: Arc<std::sync::Mutex<Option<mpsc::Receiver<()>>>>,
}

impl LibraryCache for GatedLibraryCache {
    fn register_task(&self, _job_id: &JobId) -> Result<(), String> {
        Ok(())
    }

    fn get_classloader(&self, _job_id: &JobId) -> Result<ClassLoaderHandle, String> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        if let Some(rx) = self.release.lock().unwrap().take() {
            let _ = rx.recv();
        }
        Ok(ClassLoaderHandle { descriptor: "gated".to_string() })
    }

    fn unregister_task(&self, _job_id: &JobId) {}
}

fn build_with_library_cache(
    library_cache: Box<dyn LibraryCache>,
    operator_factory: OperatorFactory,
) -> (TaskContainer<FakeClock>, Arc<RecordingWorkerNode>, Arc<AtomicMetricGroup>) {
    let identity = TaskIdentity::builder().build();
    let worker_node = RecordingWorkerNode::new();
    let metric_group = Arc::new(AtomicMetricGroup::new());

    let collaborators = Collaborators {
        worker_node: Box::new(Arc::clone(&worker_node)) as Box<dyn WorkerNodeActions>,
        checkpoint_responder: Box::new(RecordingCheckpointResponder::new()) as Box<dyn CheckpointResponder>,
        memory_manager: Box::new(NoopMemoryManager),
        library_cache,
        blob_service: Box::new(NoopBlobService),
        file_cache: Box::new(NoopFileCache),
        network: Box::new(NoopNetwork),
        event_dispatcher: Box::new(NoopEventDispatcher),
        partition_state_checker: Box::new(StubPartitionStateChecker { result: ExecutionState::Running }),
        task_state_manager: Box::new(RecordingTaskStateManager::new()) as Box<dyn TaskStateManager>,
        metric_group: Arc::clone(&metric_group),
    };

    let container = TaskContainer::new(
        identity,
        FakeClock::new(),
        ExecutionConfigOverrides::default(),
        collaborators,
        operator_factory,
        Vec::new(),
    );
    (container, worker_node, metric_group)
}

/// Scenario 2: construct, call `cancel()`, then `start()`. Expect the final
/// state to be CANCELED without any bootstrap step ever running — the
/// pre-bootstrap handshake must self-abort instead of resolving the
/// class loader.
#[test]
fn immediate_external_cancel_before_start_skips_bootstrap() {
    let resolutions = Arc::new(AtomicUsize::new(0));
    let library_cache = Box::new(GatedLibraryCache {
        resolutions: Arc::clone(&resolutions),
        release: Arc::new(std::sync::Mutex::new(None)),
    });

    let operator = ImmediateOperator::new();
    let cancels = Arc::clone(&operator.cancels);
    let factory: OperatorFactory = Box::new(move |_env| Ok(Arc::new(operator) as _));

    let (container, worker_node, metric_group) = build_with_library_cache(library_cache, factory);

    container.cancel();
    container.start();

    assert!(wait_until(|| container.state().is_terminal(), Duration::from_secs(2)));
    assert_eq!(container.state(), ExecutionState::Canceled);

    // The handshake's CANCELING -> CANCELED path never reaches bootstrap
    // step 3 (class loader resolution) or installs the operator, so the
    // triad never runs and cancel() is never delivered to it (spec.md §9
    // "Open question").
    assert_eq!(resolutions.load(Ordering::SeqCst), 0);
    assert_eq!(cancels.load(Ordering::SeqCst), 0);

    let (state, cause) = worker_node.final_state().unwrap();
    assert_eq!(state, ExecutionState::Canceled);
    assert!(cause.is_none());
    assert!(metric_group.is_closed());
}

/// Scenario 5: call `fail_externally` while the class loader resolution step
/// is still in flight. Expect the final state to be FAILED with exactly the
/// supplied cause, and the operator never instantiated.
#[test]
fn fail_externally_during_bootstrap_wins_over_deployment() {
    let resolutions = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let library_cache = Box::new(GatedLibraryCache {
        resolutions: Arc::clone(&resolutions),
        release: Arc::new(std::sync::Mutex::new(Some(rx))),
    });

    let instantiated = Arc::new(AtomicUsize::new(0));
    let instantiated_clone = Arc::clone(&instantiated);
    let factory: OperatorFactory = Box::new(move |_env| {
        instantiated_clone.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ImmediateOperator::new()) as _)
    });

    let (container, worker_node, metric_group) = build_with_library_cache(library_cache, factory);

    container.start();
    assert!(wait_until(|| resolutions.load(Ordering::SeqCst) == 1, Duration::from_secs(2)));

    container.fail_externally(FailureCause::new("external failure during deploy"));
    // Unblock the class loader resolution now that the race has been set up;
    // bootstrap step 5's drift check must catch the FAILED transition and
    // abort before the operator is ever constructed.
    let _ = tx.send(());

    assert!(wait_until(|| container.state() == ExecutionState::Failed, Duration::from_secs(2)));

    let cause = container.failure_cause().unwrap();
    assert_eq!(cause.as_str(), "external failure during deploy");
    assert_eq!(instantiated.load(Ordering::SeqCst), 0);

    let (state, worker_cause) = worker_node.final_state().unwrap();
    assert_eq!(state, ExecutionState::Failed);
    assert_eq!(worker_cause.unwrap().as_str(), "external failure during deploy");
    assert!(metric_group.is_closed());
}
