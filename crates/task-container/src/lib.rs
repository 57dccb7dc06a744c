// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! oj-task-container: the per-subtask runtime that hosts one execution
//! attempt of a user-supplied streaming/batch operator.
//!
//! See spec.md for the full design. The entry point is [`container::TaskContainer`].

pub mod config;
pub mod container;
pub mod contracts;
pub mod error;
pub mod invokable;
pub mod ledger;
pub mod metrics;
pub mod responder;
pub mod safety_net;
pub mod state;

mod cancel;
mod dispatch;
mod driver;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::{ExecutionConfigOverrides, TaskContainerConfig};
pub use container::{Collaborators, OperatorFactory, TaskContainer};
pub use contracts::{
    BlobService, CheckpointResponder, ClassLoaderHandle, EventDispatcher, FileCache, InputGate,
    LibraryCache, MemoryManager, MetricGroup, NetworkEnvironment, OperatorEnvironment,
    PartitionStateChecker, ProducedPartition, TaskStateManager, WorkerNodeActions,
};
pub use error::{
    BootstrapError, ContainerError, DispatchError, DriverError, FailureCause, OperatorError,
};
pub use invokable::{InstallOutcome, InvokableHandle, Operator};
pub use ledger::{LedgerEntry, ResourceLedger};
pub use metrics::{AtomicMetricGroup, MetricGroupSnapshot};
pub use responder::PartitionProducerStateFuture;
pub use safety_net::{Closeable, SafetyNet};
pub use state::{ExecutionState, StateCell};
