// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Partition Producer State Responder: answers "what state is the
//! producer of this partition in" queries forwarded from downstream
//! consumers, without blocking the calling (network) thread. See spec.md
//! §4.6.

use crate::container::Shared;
use crate::error::ContainerError;
use crate::state::ExecutionState;
use oj_task_container_core::Clock;
use std::marker::PhantomData;
use std::sync::mpsc;
use std::sync::Arc;

/// Handle to an in-flight partition-producer-state query. Construction runs
/// on the container's executor (the Async Call Dispatcher's non-blocking
/// worker), not the caller's thread; the caller resolves this on its own
/// schedule via [`wait`](Self::wait) or [`try_get`](Self::try_get).
///
/// Not a `std::future::Future` — this crate carries no async runtime
/// (spec.md §4.5's dispatcher is plain OS threads) — but plays the same
/// role: a value the caller polls or blocks on independently of whichever
/// thread produces it.
pub struct PartitionProducerStateFuture<C: Clock> {
    receiver: mpsc::Receiver<Result<ExecutionState, ContainerError>>,
    _clock: PhantomData<C>,
}

impl<C: Clock> PartitionProducerStateFuture<C> {
    fn ready(result: Result<ExecutionState, ContainerError>) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(result);
        Self { receiver: rx, _clock: PhantomData }
    }

    /// Block the calling thread until the query resolves.
    pub fn wait(self) -> Result<ExecutionState, ContainerError> {
        self.receiver.recv().unwrap_or(Err(ContainerError::NotRunning))
    }

    /// Non-blocking poll; `None` means the query has not resolved yet.
    pub fn try_get(&self) -> Option<Result<ExecutionState, ContainerError>> {
        self.receiver.try_recv().ok()
    }
}

/// Forward a downstream consumer's query to the partition state checker
/// collaborator, off the calling thread (spec.md §4.6 "Handle construction
/// runs on the container's executor").
pub(crate) fn request_partition_producer_state<C: Clock>(
    shared: &Arc<Shared<C>>,
    intermediate_dataset_id: String,
    partition_id: String,
) -> PartitionProducerStateFuture<C> {
    let (tx, rx) = mpsc::channel();
    let task = Arc::clone(shared);
    let job: crate::dispatch::Job = Box::new(move || {
        let result = task
            .collaborators
            .partition_state_checker
            .request_partition_producer_state(&intermediate_dataset_id, &partition_id);
        let _ = tx.send(result);
    });

    match crate::dispatch::submit(shared, job, false) {
        Ok(()) => PartitionProducerStateFuture { receiver: rx, _clock: PhantomData },
        Err(err) => {
            tracing::debug!(
                job_id = %shared.identity.job_id,
                error = %err,
                "partition producer state query dropped, dispatcher unavailable",
            );
            PartitionProducerStateFuture::ready(Err(ContainerError::NotRunning))
        }
    }
}
