use super::*;
use crate::config::ExecutionConfigOverrides;
use crate::container::OperatorFactory;
use crate::state::ExecutionState;
use crate::test_support::{build_container, wait_until, CooperativeOperator, ImmediateOperator, StuckOperator};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn cancel_before_start_transitions_to_canceling_without_launching_triad() {
    let invokes = Arc::new(AtomicUsize::new(0));
    let cancels = Arc::new(AtomicUsize::new(0));
    let operator = ImmediateOperator { invokes: Arc::clone(&invokes), cancels: Arc::clone(&cancels) };
    let factory: OperatorFactory = Box::new(move |_env| Ok(Arc::new(operator) as _));
    let (container, _fixture) = build_container(factory, 0, 0, false, ExecutionConfigOverrides::default());

    container.cancel();
    assert_eq!(container.state(), ExecutionState::Canceling);

    // The driver thread never started, so the triad never launched and the
    // operator's cancel() hook was never reached.
    assert_eq!(cancels.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_is_idempotent_once_canceling() {
    let invokes = Arc::new(AtomicUsize::new(0));
    let cancels = Arc::new(AtomicUsize::new(0));
    let operator = ImmediateOperator { invokes: Arc::clone(&invokes), cancels: Arc::clone(&cancels) };
    let factory: OperatorFactory = Box::new(move |_env| Ok(Arc::new(operator) as _));
    let (container, _fixture) = build_container(factory, 0, 0, false, ExecutionConfigOverrides::default());

    container.cancel();
    container.cancel();
    container.cancel();
    assert_eq!(container.state(), ExecutionState::Canceling);
}

#[test]
fn fail_externally_is_a_noop_once_terminal() {
    let operator = ImmediateOperator::new();
    let factory: OperatorFactory = Box::new(move |_env| Ok(Arc::new(operator) as _));
    let (container, _fixture) = build_container(factory, 0, 0, false, ExecutionConfigOverrides::default());

    container.start();
    assert!(wait_until(|| container.state() == ExecutionState::Finished, Duration::from_secs(2)));

    container.fail_externally(crate::error::FailureCause::new("too late"));
    assert_eq!(container.state(), ExecutionState::Finished);
}

#[test]
fn cooperative_operator_observes_cancel_exactly_once_via_the_triad() {
    let invokes = Arc::new(AtomicUsize::new(0));
    let cancels = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicBool::new(false));
    let operator = CooperativeOperator {
        invokes: Arc::clone(&invokes),
        cancels: Arc::clone(&cancels),
        cancelled: Arc::clone(&cancelled),
    };
    let factory: OperatorFactory = Box::new(move |_env| Ok(Arc::new(operator) as _));
    let (container, _fixture) = build_container(factory, 0, 0, false, ExecutionConfigOverrides::default());

    container.start();
    assert!(wait_until(|| container.state() == ExecutionState::Running, Duration::from_secs(2)));

    container.cancel();
    // A second request while already CANCELING must stay a no-op: it must
    // not re-launch the triad or deliver a second cancel() to the operator.
    container.cancel();

    assert!(wait_until(|| container.state().is_terminal(), Duration::from_secs(2)));
    assert_eq!(container.state(), ExecutionState::Canceled);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn stuck_operator_past_cancellation_timeout_escalates_to_fatal_error() {
    let (operator, release) = StuckOperator::new();
    let factory: OperatorFactory = Box::new(move |_env| Ok(Arc::new(operator) as _));
    let overrides = ExecutionConfigOverrides {
        cancellation_timeout_ms: Some(1),
        cancellation_interval_ms: Some(1),
        ..Default::default()
    };
    let (container, fixture) = build_container(factory, 0, 0, false, overrides);

    container.start();
    assert!(wait_until(|| container.state() == ExecutionState::Running, Duration::from_secs(2)));

    container.cancel();

    // The watchdog's timeout never really elapses in wall-clock time (the
    // fake clock's `sleep` returns immediately), so it fires on its first
    // pass while the stuck operator is still blocked in `invoke`.
    assert!(wait_until(|| fixture.worker_node.fatal_error_count() >= 1, Duration::from_secs(2)));

    // Release the operator so the driver thread can unwind and the
    // interrupter's busy loop observes `executing_alive == false` and exits.
    let _ = release.send(());
    assert!(wait_until(|| container.state().is_terminal(), Duration::from_secs(2)));
}
