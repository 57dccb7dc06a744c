// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the task execution container.
//!
//! One `thiserror` enum per concern, following the teacher's convention of a
//! dedicated error type per module rather than one crate-wide error. See
//! spec.md §7 "Error kinds".

use std::sync::Arc;
use thiserror::Error;

/// Error escaping the user operator's `invoke`, `cancel`, `trigger_checkpoint`,
/// or `notify_checkpoint_complete` hooks.
///
/// User code is arbitrary and not generic over a concrete error type in this
/// crate, so the message is captured as a string with an optional chained
/// source — mirroring how the teacher's adapters capture subprocess/agent
/// failures as formatted strings rather than typed causes.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct OperatorError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    /// Set when the operator itself detected it ran out of memory. Rust has
    /// no catchable analogue of the JVM's `OutOfMemoryError` — the global
    /// allocator aborts the process directly — so this only ever becomes
    /// `true` when an operator deliberately reports the condition (e.g. a
    /// custom allocation guard), making `halt_on_oom` exercisable in tests.
    pub out_of_memory: bool,
}

impl OperatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None, out_of_memory: false }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { message: message.into(), source: Some(Box::new(source)), out_of_memory: false }
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None, out_of_memory: true }
    }
}

impl From<String> for OperatorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperatorError {
    fn from(message: &str) -> Self {
        Self::new(message.to_string())
    }
}

/// Errors raised during the Execution Driver's bootstrap phase (spec.md §4.3
/// steps 1–10). Each variant names a distinct acquisition step so the worker
/// node can tell a deploy bug (missing factory, bad class) from a runtime one.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("no operator factory registered for kind {0:?}")]
    FactoryNotFound(String),

    #[error("user-code class loader resolution failed: {0}")]
    ClassLoadFailure(String),

    #[error("execution configuration deserialization failed: {0}")]
    ConfigDeserialize(String),

    #[error("distributed cache entry {entry:?} failed to materialize: {reason}")]
    FileCache { entry: String, reason: String },

    #[error("produced partition or input gate setup failed: {0}")]
    NetworkSetup(String),

    #[error("permanent BLOB job registration failed: {0}")]
    BlobRegistration(String),

    #[error("operator instantiation failed: {0}")]
    OperatorInstantiation(#[from] OperatorError),

    #[error("{0}")]
    Other(String),
}

/// Funnel error type for the Execution Driver's single exception handler
/// (spec.md §4.3 "Exceptional exit"). Every error surfacing from bootstrap or
/// `invoke` is converted into one of these before the handler decides the
/// terminal transition.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Internal signal meaning the state cell drifted out of a live value
    /// during bootstrap or just after `invoke` returned. Never carries a
    /// failure cause — the transition it drives is CANCELED, not FAILED.
    #[error("cancel-task signal")]
    CancelTask,

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    OperatorInvocation(#[from] OperatorError),

    /// A transport-only wrapper around another `DriverError`, used to shorten
    /// stack traces the way the original crosses an RPC boundary. See
    /// [`unwrap_transport`].
    #[error("wrapped: {0}")]
    Wrapped(Box<DriverError>),

    /// Unrecoverable runtime condition (out-of-memory or equivalent). Honors
    /// `halt_on_oom`: when set, the driver halts the process instead of
    /// routing this into the normal FAILED transition.
    #[error("fatal runtime condition: {0}")]
    Fatal(String),
}

impl DriverError {
    pub fn is_cancel_task(&self) -> bool {
        matches!(self, DriverError::CancelTask)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Fatal(_))
    }
}

/// Unwrap a [`DriverError::Wrapped`] chain down to the real underlying error.
///
/// Maps the original's "wrapping runtime exceptions to shorten stack traces"
/// idiom onto a tagged variant rather than a language-level mechanism (see
/// spec.md §9 design notes).
pub fn unwrap_transport(err: DriverError) -> DriverError {
    match err {
        DriverError::Wrapped(inner) => unwrap_transport(*inner),
        other => other,
    }
}

/// The failure cause recorded on a transition into FAILED (spec.md §3,
/// invariant I6). Cloneable and shareable across threads since both the
/// Cancellation Orchestrator and the Execution Driver's exception handler
/// may race to set it.
#[derive(Debug, Clone)]
pub struct FailureCause(pub Arc<str>);

impl FailureCause {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self(message.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&DriverError> for FailureCause {
    fn from(err: &DriverError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<&BootstrapError> for FailureCause {
    fn from(err: &BootstrapError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<&OperatorError> for FailureCause {
    fn from(err: &OperatorError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for FailureCause {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for FailureCause {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Errors surfacing from the Async Call Dispatcher's submission path
/// (spec.md §4.5). A rejection while the task is still RUNNING is a genuine
/// internal fault; one observed after the task left RUNNING is routine
/// (the dispatcher was shut down as part of cleanup) and is logged, not
/// propagated.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("async call dispatcher is shutting down")]
    ShuttingDown,

    #[error("operator error: {0}")]
    Operator(#[from] OperatorError),

    #[error("failed to spawn async call dispatcher worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

/// Top-level errors from the container's externally-callable operations
/// that are not folded into the driver's funnel (e.g. partition producer
/// state queries).
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("partition state checker query failed: {0}")]
    PartitionStateQuery(String),

    #[error("container is not running")]
    NotRunning,
}
