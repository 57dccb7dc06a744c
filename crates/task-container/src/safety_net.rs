// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-system safety net: a per-thread registry of resources opened by user
//! code that must be closed if the operator itself leaks them.
//!
//! Maps the original's per-thread auto-close registry onto an explicit
//! scoped-acquisition capability (spec.md §9): the Execution Driver arms one
//! on entry and disarms it unconditionally in the cleanup path (step 7);
//! asynchronous callbacks that run on the Async Call Dispatcher's worker
//! threads receive the same handle by value (an `Arc` clone) rather than
//! relying on thread-local state, and re-enter its scope for their duration.

use parking_lot::Mutex;
use std::sync::Arc;

/// A resource the safety net should close if nobody else did.
pub trait Closeable: Send {
    fn close(&mut self);
}

/// Per-task registry, armed once per Execution Driver lifetime.
pub struct SafetyNet {
    task_name: String,
    resources: Mutex<Vec<Box<dyn Closeable>>>,
}

impl SafetyNet {
    /// Arm a fresh safety net for the named task thread.
    pub fn arm(task_name: impl Into<String>) -> Arc<Self> {
        let net = Arc::new(Self { task_name: task_name.into(), resources: Mutex::new(Vec::new()) });
        tracing::debug!(task = %net.task_name, "file-system safety net armed");
        net
    }

    /// Register a resource opened by user code that must be closed if the
    /// task ends without the operator closing it itself.
    pub fn register(&self, resource: Box<dyn Closeable>) {
        self.resources.lock().push(resource);
    }

    /// Enter the safety net's scope for the duration of the returned guard,
    /// e.g. from an Async Call Dispatcher worker thread handling a checkpoint
    /// callback that may open user-code resources. The guard's `Drop`
    /// restores nothing by itself — the scope is purely a logging / future
    /// extension point — but gives async callbacks the same explicit,
    /// by-value handle the driver thread holds, per spec.md §9's "do not
    /// rely on thread-local global state" guidance.
    pub fn enter_scope(self: &Arc<Self>) -> ScopeGuard {
        ScopeGuard { net: Arc::clone(self) }
    }

    /// Close every still-registered resource and disarm. Idempotent:
    /// draining an empty registry is a no-op.
    pub fn disarm(&self) {
        let leaked: Vec<_> = self.resources.lock().drain(..).collect();
        if !leaked.is_empty() {
            tracing::warn!(
                task = %self.task_name,
                count = leaked.len(),
                "file-system safety net closing leaked resources",
            );
        }
        for mut resource in leaked {
            resource.close();
        }
    }
}

/// RAII scope marker returned by [`SafetyNet::enter_scope`].
pub struct ScopeGuard {
    net: Arc<SafetyNet>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        tracing::trace!(task = %self.net.task_name, "leaving file-system safety net scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResource(Arc<AtomicUsize>);

    impl Closeable for CountingResource {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn disarm_closes_every_registered_resource() {
        let net = SafetyNet::arm("test-task");
        let closes = Arc::new(AtomicUsize::new(0));
        net.register(Box::new(CountingResource(Arc::clone(&closes))));
        net.register(Box::new(CountingResource(Arc::clone(&closes))));
        net.disarm();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disarm_is_idempotent() {
        let net = SafetyNet::arm("test-task");
        net.disarm();
        net.disarm();
    }

    #[test]
    fn enter_scope_does_not_panic_without_resources() {
        let net = SafetyNet::arm("test-task");
        let _guard = net.enter_scope();
    }
}
