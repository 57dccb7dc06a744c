// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Execution Driver: the body of the dedicated per-task thread spawned
//! by [`crate::container::TaskContainer::start`]. Runs the pre-bootstrap
//! handshake, bootstrap, the user operator's `invoke`, and funnels every
//! exit — normal or exceptional — through the single cleanup path. See
//! spec.md §4.3 and §4.2.

use crate::container::Shared;
use crate::contracts::MetricGroup;
use crate::error::{unwrap_transport, BootstrapError, DriverError, FailureCause};
use crate::invokable::InstallOutcome;
use crate::ledger::LedgerEntry;
use crate::state::ExecutionState;
use oj_task_container_core::Clock;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Thread body. Never panics: every fallible step funnels into
/// [`handle_exceptional_exit`], and [`cleanup`] runs unconditionally before
/// the thread returns.
pub(crate) fn run<C: Clock>(shared: Arc<Shared<C>>) {
    if !handshake(&shared) {
        return;
    }

    shared.executing_alive.store(true, Ordering::SeqCst);
    let outcome = bootstrap(&shared).and_then(|()| invoke(&shared));
    shared.executing_alive.store(false, Ordering::SeqCst);

    if let Err(err) = outcome {
        handle_exceptional_exit(&shared, err);
    }

    cleanup(&shared);
}

/// spec.md §4.3 "Pre-bootstrap handshake". Returns `true` to proceed into
/// bootstrap, `false` if a final state was already published and the thread
/// should exit without running `cleanup` (the bootstrap steps never ran, so
/// there is nothing in the ledger to release — spec.md §9 "Open question").
fn handshake<C: Clock>(shared: &Arc<Shared<C>>) -> bool {
    loop {
        let current = shared.state.get();
        match current {
            ExecutionState::Created => {
                if shared.state.try_transition(
                    ExecutionState::Created,
                    ExecutionState::Deploying,
                    None,
                ) {
                    return true;
                }
                // Lost the race to an external cancel/fail; re-read and retry.
            }
            ExecutionState::Failed => {
                tracing::info!(
                    job_id = %shared.identity.job_id,
                    "handshake: already FAILED before driver start",
                );
                shared.publish_state();
                shared.collaborators.metric_group.close();
                return false;
            }
            ExecutionState::Canceling => {
                shared.state.try_transition(
                    ExecutionState::Canceling,
                    ExecutionState::Canceled,
                    None,
                );
                shared.publish_state();
                shared.collaborators.metric_group.close();
                return false;
            }
            other => {
                tracing::error!(
                    job_id = %shared.identity.job_id,
                    state = %other,
                    "handshake: unexpected state at driver start, programmer error",
                );
                shared.state.try_transition(
                    other,
                    ExecutionState::Failed,
                    Some(FailureCause::new(format!("unexpected state {other} at driver start"))),
                );
                shared.publish_state();
                shared.collaborators.metric_group.close();
                return false;
            }
        }
    }
}

/// Returns `Err(DriverError::CancelTask)` if the state is no longer
/// `expected` — the abort checks at bootstrap steps 5 and 8 (spec.md §4.3).
fn check_not_drifted<C: Clock>(
    shared: &Arc<Shared<C>>,
    expected: ExecutionState,
) -> Result<(), DriverError> {
    if shared.state.get() == expected {
        Ok(())
    } else {
        Err(DriverError::CancelTask)
    }
}

/// Bootstrap steps 1-13 (spec.md §4.3). Each undoable acquisition is pushed
/// to the Resource Ledger immediately so a failure partway through still
/// releases everything acquired so far, in reverse order (invariant I4).
fn bootstrap<C: Clock>(shared: &Arc<Shared<C>>) -> Result<(), DriverError> {
    // Step 1: arm the file-system safety net for this thread.
    let safety_net = crate::safety_net::SafetyNet::arm(shared.identity.thread_name());
    *shared.safety_net.lock() = Some(Arc::clone(&safety_net));
    shared.ledger.push(LedgerEntry::FsSafetyNet, {
        let safety_net = Arc::clone(&safety_net);
        move || {
            safety_net.disarm();
            Ok(())
        }
    });

    // Step 2: register the job with the permanent BLOB service.
    shared
        .collaborators
        .blob_service
        .register_job(&shared.identity.job_id)
        .map_err(BootstrapError::BlobRegistration)?;
    shared.ledger.push(LedgerEntry::BlobJobRegistration, {
        let shared = Arc::clone(shared);
        move || {
            shared.collaborators.blob_service.release_job(&shared.identity.job_id);
            Ok(())
        }
    });

    // Step 3: resolve the user-code class loader via the library cache.
    // This may download artifacts and is the only bootstrap step besides
    // the distributed-cache copies that is expected to block for a while.
    shared
        .collaborators
        .library_cache
        .register_task(&shared.identity.job_id)
        .map_err(BootstrapError::ClassLoadFailure)?;
    let class_loader = shared
        .collaborators
        .library_cache
        .get_classloader(&shared.identity.job_id)
        .map_err(BootstrapError::ClassLoadFailure)?;
    shared.ledger.push(LedgerEntry::ClassLoader, {
        let shared = Arc::clone(shared);
        move || {
            shared.collaborators.library_cache.unregister_task(&shared.identity.job_id);
            Ok(())
        }
    });

    // Step 4: the execution configuration's cancellation-interval/timeout
    // overrides were already resolved into `shared.config` when the
    // container was constructed (deployment-descriptor parsing and
    // deserialization are out of scope, spec.md §1); log the effective
    // values here, at the point spec.md describes them as "adopted".
    {
        let config = *shared.config.lock();
        tracing::debug!(
            job_id = %shared.identity.job_id,
            cancellation_interval_ms = config.cancellation_interval.as_millis() as u64,
            cancellation_timeout_ms = config.cancellation_timeout.map(|d| d.as_millis() as u64),
            halt_on_oom = config.halt_on_oom,
            "bootstrap: effective execution configuration",
        );
    }

    // Step 5: abort if the state drifted out of DEPLOYING.
    check_not_drifted(shared, ExecutionState::Deploying)?;

    // Step 6: set up produced partitions and input gates, registering each
    // produced partition with the event dispatcher. Partitions/gates are
    // stored into `shared` before `setup()` runs so a failure partway
    // through the loop still leaves the already-created ones reachable for
    // cleanup.
    let partitions = shared.collaborators.network.create_produced_partitions();
    *shared.partitions.lock() = partitions;
    shared.ledger.push(LedgerEntry::ProducedPartitions, {
        let shared = Arc::clone(shared);
        move || {
            let final_state = shared.state.get();
            let cause = shared.state.cause();
            let should_fail = matches!(
                final_state,
                ExecutionState::Canceled | ExecutionState::Canceling | ExecutionState::Failed
            );
            for partition in shared.partitions.lock().iter() {
                shared.collaborators.event_dispatcher.unregister(partition.partition_id());
                if should_fail {
                    let cause = cause.clone().unwrap_or_else(|| {
                        FailureCause::new(format!("task terminated in state {final_state}"))
                    });
                    partition.fail(&cause);
                }
                partition.close();
            }
            Ok(())
        }
    });
    for partition in shared.partitions.lock().iter() {
        partition.setup().map_err(BootstrapError::NetworkSetup)?;
        shared.collaborators.event_dispatcher.register(partition.partition_id());
    }

    let gates = shared.collaborators.network.create_input_gates();
    *shared.gates.lock() = gates;
    shared.ledger.push(LedgerEntry::InputGates, {
        let shared = Arc::clone(shared);
        move || {
            for gate in shared.gates.lock().iter() {
                gate.close();
            }
            Ok(())
        }
    });
    for gate in shared.gates.lock().iter() {
        gate.setup().map_err(BootstrapError::NetworkSetup)?;
    }

    // Step 7: schedule background copies for every distributed-cache entry,
    // collecting per-entry futures (here, join handles).
    let mut handles = Vec::with_capacity(shared.distributed_cache_entries.len());
    for entry in &shared.distributed_cache_entries {
        let handle = shared.collaborators.file_cache.create_tmp_file(
            entry,
            &shared.identity.job_id,
            &shared.identity.execution_attempt_id,
        );
        handles.push((entry.clone(), handle));
    }
    shared.ledger.push(LedgerEntry::FileCacheEntry { entry_name: shared.identity.job_id.to_string() }, {
        let shared = Arc::clone(shared);
        move || {
            shared
                .collaborators
                .file_cache
                .release_job(&shared.identity.job_id, &shared.identity.execution_attempt_id);
            Ok(())
        }
    });
    let mut dcache_files = Vec::with_capacity(handles.len());
    for (entry, handle) in handles {
        let path = handle
            .join()
            .map_err(|_| BootstrapError::FileCache {
                entry: entry.clone(),
                reason: "copy thread panicked".to_string(),
            })?
            .map_err(|reason| BootstrapError::FileCache { entry: entry.clone(), reason })?;
        shared.ledger.push(LedgerEntry::DistributedCacheFuture { entry_name: entry.clone() }, || Ok(()));
        dcache_files.push((entry, path));
    }

    // Step 8: abort if the state drifted again.
    check_not_drifted(shared, ExecutionState::Deploying)?;

    // Step 9: build the operator environment (bundling every collaborator
    // the operator itself is allowed to see) and instantiate the operator
    // via the factory supplied at construction (spec.md §9's trait-object
    // registry, already resolved by the caller into `operator_factory`).
    let environment = crate::contracts::OperatorEnvironment {
        job_id: shared.identity.job_id,
        execution_attempt_id: shared.identity.execution_attempt_id,
        subtask_index: shared.identity.subtask_index,
        class_loader,
        distributed_cache_files: dcache_files,
    };
    let operator =
        (shared.operator_factory)(&environment).map_err(BootstrapError::OperatorInstantiation)?;
    shared.ledger.push(LedgerEntry::MemoryAllocation { owner: "operator" }, {
        let shared = Arc::clone(shared);
        move || {
            shared.collaborators.memory_manager.release_all(&shared.identity.execution_attempt_id);
            Ok(())
        }
    });

    // Step 10: publish the operator into the Invokable Handle. If a cancel
    // already raced ahead of installation, the handle delivered it to
    // nobody (there was no operator yet) and remembers that fact; the
    // driver must not proceed to RUNNING in that case.
    if matches!(shared.invokable.install(operator), InstallOutcome::AlreadyCancelled) {
        return Err(DriverError::CancelTask);
    }

    // Step 11: DEPLOYING -> RUNNING.
    if !shared.state.try_transition(ExecutionState::Deploying, ExecutionState::Running, None) {
        return Err(DriverError::CancelTask);
    }

    // Step 12: notify the worker node that the task is now running.
    shared.publish_state();

    // Step 13: the user-code class loader is threaded explicitly through
    // `environment` above rather than installed as a thread-local context
    // class loader (spec.md §9 design note: "do not rely on thread-local
    // global state").

    Ok(())
}

/// The user invocation (spec.md §4.3 "User invocation").
fn invoke<C: Clock>(shared: &Arc<Shared<C>>) -> Result<(), DriverError> {
    shared.invokable.invoke().map_err(DriverError::OperatorInvocation)?;

    check_not_drifted(shared, ExecutionState::Running)?;

    for partition in shared.partitions.lock().iter() {
        partition.finish();
    }

    if shared.state.try_transition(ExecutionState::Running, ExecutionState::Finished, None) {
        Ok(())
    } else {
        // Something else won the race between `finish()` above and this
        // CAS (a concurrent cancel/fail); let the exceptional-exit handler
        // resolve the now-non-RUNNING state.
        Err(DriverError::CancelTask)
    }
}

/// The single exception handler every bootstrap/invoke error funnels
/// through (spec.md §4.3 "Exceptional exit", §7 "Propagation policy").
fn handle_exceptional_exit<C: Clock>(shared: &Arc<Shared<C>>, err: DriverError) {
    let err = unwrap_transport(err);

    let is_oom_halt = matches!(&err, DriverError::OperatorInvocation(op) if op.out_of_memory)
        && shared.config.lock().halt_on_oom;
    if err.is_fatal() || is_oom_halt {
        let message = format!("fatal error in task {}: {}", shared.identity, err);
        tracing::error!(job_id = %shared.identity.job_id, "{}", message);
        shared.collaborators.worker_node.notify_fatal_error(&message, None);
        std::process::abort();
    }

    loop {
        let current = shared.state.get();
        match current {
            _ if current.is_terminal() => return,
            ExecutionState::Canceling => {
                if shared.state.try_transition(
                    ExecutionState::Canceling,
                    ExecutionState::Canceled,
                    None,
                ) {
                    deliver_cancel_to_operator(shared);
                    return;
                }
            }
            ExecutionState::Deploying | ExecutionState::Running if err.is_cancel_task() => {
                if shared.state.try_transition(current, ExecutionState::Canceled, None) {
                    deliver_cancel_to_operator(shared);
                    return;
                }
            }
            ExecutionState::Deploying | ExecutionState::Running => {
                let cause = FailureCause::from(&err);
                if shared.state.try_transition(current, ExecutionState::Failed, Some(cause)) {
                    deliver_cancel_to_operator(shared);
                    return;
                }
            }
            other => {
                tracing::warn!(
                    job_id = %shared.identity.job_id,
                    state = %other,
                    error = %err,
                    "exceptional exit: unexpected non-terminal state, treating as FAILED",
                );
                if shared.state.try_transition(other, ExecutionState::Failed, Some(FailureCause::from(&err))) {
                    deliver_cancel_to_operator(shared);
                    return;
                }
            }
        }
    }
}

/// Cancels the operator (guarded by the once-latch, invariant I3) as part of
/// routing the driver itself into a terminal cancel/fail state — this is
/// the exception handler's own cancel delivery, distinct from the
/// Cancellation Orchestrator's triad.
fn deliver_cancel_to_operator<C: Clock>(shared: &Arc<Shared<C>>) {
    if let Err(err) = shared.invokable.cancel() {
        tracing::warn!(
            job_id = %shared.identity.job_id,
            error = %err,
            "exceptional exit: operator cancel() hook failed, continuing shutdown",
        );
    }
}

/// The shared cleanup path (spec.md §4.2), run exactly once regardless of
/// how execution ended. Never raises: ledger release failures are logged
/// and cleanup continues (see [`crate::ledger::ResourceLedger::release_all`]).
fn cleanup<C: Clock>(shared: &Arc<Shared<C>>) {
    // Step 1: null the Invokable Handle.
    shared.invokable.clear();

    // Step 2: shut down the Async Call Dispatcher, if one was ever created.
    crate::dispatch::shutdown(shared);

    // Steps 3-7: release every ledger entry in reverse acquisition order
    // (memory, file cache/distributed cache, class loader, BLOB job, safety
    // net — partitions and gates release first since they were pushed last
    // among the network-facing entries).
    shared.ledger.release_all();

    // Step 8: publish the final state.
    shared.publish_state();

    // Step 9: close the metric group last, so the task is observed as
    // finished before its metrics disappear.
    shared.collaborators.metric_group.close();
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
