// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Invokable Handle and the `Operator` trait user code implements.
//!
//! See spec.md §3 "Invokable Handle", §4.4 invariant I3 ("`cancel()` is
//! delivered to the operator at most once, regardless of how many external
//! actors call `TaskContainer::cancel`"), and invariant I5 ("no externally
//! callable method ever blocks on user code").
//!
//! The operator's `invoke` may block for the entire task lifetime while
//! `cancel`, `trigger_checkpoint`, and `notify_checkpoint_complete` must be
//! deliverable concurrently from other threads without waiting on it. A
//! `Mutex<Box<dyn Operator>>` cannot satisfy that: locking it for the
//! duration of `invoke` would make every other method block on user code,
//! violating I5. Instead `Operator` methods all take `&self` — operators own
//! whatever interior mutability they need (an `AtomicBool` cancel flag is the
//! common case) — and the handle stores `Arc<dyn Operator>`, so `invoke` and
//! `cancel` can run on different threads at the same instant, each holding
//! its own clone of the `Arc`, with the handle's own lock taken only for the
//! instant of cloning it out.

use crate::error::OperatorError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The user-supplied operator this container drives. Analogous to the
/// original's `AbstractInvokable`: one constructor-shaped factory call during
/// bootstrap, then `invoke()` on the Execution Driver thread, and `cancel()`
/// from whichever thread first wins the cancel race.
///
/// All methods take `&self` rather than `&mut self` so the container never
/// needs exclusive access to call them — implementations are responsible for
/// their own thread safety, exactly as spec.md's contract puts it: "must
/// treat `cancel()` as callable concurrently with `invoke()` ... and must not
/// block indefinitely in response to it."
pub trait Operator: Send + Sync + 'static {
    /// Runs on the Execution Driver thread. Returns when the task's work is
    /// done, is cancelled, or fails.
    fn invoke(&self) -> Result<(), OperatorError>;

    /// Requests cooperative cancellation. Called at most once. May be called
    /// from any thread while `invoke` is running elsewhere.
    fn cancel(&self) -> Result<(), OperatorError>;

    /// Attempt to trigger a checkpoint barrier. Returns whether the operator
    /// accepted the request (`false` typically means the operator already
    /// passed the point where barriers are honored).
    fn trigger_checkpoint(&self, checkpoint_id: u64) -> Result<bool, OperatorError> {
        let _ = checkpoint_id;
        Ok(false)
    }

    /// Notifies the operator that a checkpoint was completed by the
    /// coordinator. Best-effort; the default does nothing.
    fn notify_checkpoint_complete(&self, checkpoint_id: u64) -> Result<(), OperatorError> {
        let _ = checkpoint_id;
        Ok(())
    }

    /// Whether the container's watchdog daemon (spec.md §4.4) should escalate
    /// to a fatal, process-wide error if this operator has not returned from
    /// `invoke` a configured timeout after `cancel` was delivered. Operators
    /// that cannot guarantee bounded cancellation should return `true`.
    fn should_interrupt_on_cancel(&self) -> bool {
        false
    }
}

/// Holds the (possibly absent) running operator, with a once-only latch so a
/// `cancel()` racing against bootstrap or against another `cancel()` call is
/// delivered exactly once (invariant I3).
///
/// The original achieves "at most once" with a `volatile` reference plus a
/// synchronized block; this crate forbids `unsafe`, so the handle is a
/// `Mutex<Option<Arc<dyn Operator>>>` locked only long enough to clone the
/// `Arc` out, plus an `AtomicBool` latch checked before delivery.
pub struct InvokableHandle {
    operator: Mutex<Option<Arc<dyn Operator>>>,
    cancel_delivered: AtomicBool,
}

impl InvokableHandle {
    pub fn empty() -> Self {
        Self { operator: Mutex::new(None), cancel_delivered: AtomicBool::new(false) }
    }

    /// Installs the operator once bootstrap has constructed it. If `cancel`
    /// already fired before installation (the task was cancelled before the
    /// operator ever existed), delivers it immediately instead of invoking
    /// the now-installed operator, and reports that it did so.
    pub fn install(&self, operator: Arc<dyn Operator>) -> InstallOutcome {
        let mut guard = self.operator.lock();
        if self.cancel_delivered.load(Ordering::SeqCst) {
            return InstallOutcome::AlreadyCancelled;
        }
        *guard = Some(operator);
        InstallOutcome::Installed
    }

    /// Clear the handle to null. Cleanup step 1 (spec.md §4.2); also
    /// idempotent so a repeated cleanup pass is harmless.
    pub fn clear(&self) {
        *self.operator.lock() = None;
    }

    /// Copy the (possibly absent) operator to a local `Arc`, per the "readers
    /// must copy to a local and null-check before use" discipline in
    /// spec.md §3.
    fn get(&self) -> Option<Arc<dyn Operator>> {
        self.operator.lock().clone()
    }

    /// Whether an operator is currently installed. Used by the Cancellation
    /// Orchestrator to decide whether launching the triad is worth it at all
    /// (spec.md §4.4 step 3).
    pub fn has_operator(&self) -> bool {
        self.operator.lock().is_some()
    }

    /// Delivers `cancel()` to the installed operator if present, exactly
    /// once overall. A second call is a silent no-op, as is a call before
    /// installation (recorded via the latch so a later `install` does not
    /// proceed to invoke).
    pub fn cancel(&self) -> Result<(), OperatorError> {
        if self.cancel_delivered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.get() {
            Some(op) => op.cancel(),
            None => Ok(()),
        }
    }

    pub fn trigger_checkpoint(&self, checkpoint_id: u64) -> Result<bool, OperatorError> {
        match self.get() {
            Some(op) => op.trigger_checkpoint(checkpoint_id),
            None => Ok(false),
        }
    }

    pub fn notify_checkpoint_complete(&self, checkpoint_id: u64) -> Result<(), OperatorError> {
        match self.get() {
            Some(op) => op.notify_checkpoint_complete(checkpoint_id),
            None => Ok(()),
        }
    }

    pub fn should_interrupt_on_cancel(&self) -> bool {
        self.get().map(|op| op.should_interrupt_on_cancel()).unwrap_or(false)
    }

    /// Runs `invoke` on the installed operator. Called exactly once, from the
    /// Execution Driver thread (invariant I2); concurrent `cancel` calls only
    /// ever take the lock for the instant of cloning their own `Arc`, so this
    /// may block for the operator's entire lifetime without blocking anyone.
    pub fn invoke(&self) -> Result<(), OperatorError> {
        match self.get() {
            Some(op) => op.invoke(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingOperator {
        cancels: Arc<AtomicUsize>,
        invokes: Arc<AtomicUsize>,
    }

    impl Operator for CountingOperator {
        fn invoke(&self) -> Result<(), OperatorError> {
            self.invokes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self) -> Result<(), OperatorError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn cancel_before_install_is_remembered() {
        let handle = InvokableHandle::empty();
        handle.cancel().unwrap();

        let cancels = Arc::new(AtomicUsize::new(0));
        let invokes = Arc::new(AtomicUsize::new(0));
        let outcome = handle.install(Arc::new(CountingOperator {
            cancels: Arc::clone(&cancels),
            invokes: Arc::clone(&invokes),
        }));
        assert_eq!(outcome, InstallOutcome::AlreadyCancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_delivered_at_most_once() {
        let handle = Arc::new(InvokableHandle::empty());
        let cancels = Arc::new(AtomicUsize::new(0));
        let invokes = Arc::new(AtomicUsize::new(0));
        handle.install(Arc::new(CountingOperator {
            cancels: Arc::clone(&cancels),
            invokes: Arc::clone(&invokes),
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let handle = Arc::clone(&handle);
            handles.push(std::thread::spawn(move || handle.cancel().unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invoke_runs_installed_operator() {
        let handle = Arc::new(InvokableHandle::empty());
        let cancels = Arc::new(AtomicUsize::new(0));
        let invokes = Arc::new(AtomicUsize::new(0));
        handle.install(Arc::new(CountingOperator {
            cancels: Arc::clone(&cancels),
            invokes: Arc::clone(&invokes),
        }));
        handle.invoke().unwrap();
        assert_eq!(invokes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_runs_concurrently_with_a_blocking_invoke() {
        use std::sync::mpsc;
        use std::time::Duration;

        struct BlockingOperator {
            cancelled: Arc<AtomicBool>,
            started: mpsc::Sender<()>,
        }

        impl Operator for BlockingOperator {
            fn invoke(&self) -> Result<(), OperatorError> {
                self.started.send(()).unwrap();
                while !self.cancelled.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }

            fn cancel(&self) -> Result<(), OperatorError> {
                self.cancelled.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let handle = Arc::new(InvokableHandle::empty());
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        handle.install(Arc::new(BlockingOperator { cancelled: Arc::clone(&cancelled), started: tx }));

        let invoking = Arc::clone(&handle);
        let invoke_thread = std::thread::spawn(move || invoking.invoke().unwrap());

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel().unwrap();
        invoke_thread.join().unwrap();
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn has_operator_reflects_install_and_clear() {
        let handle = InvokableHandle::empty();
        assert!(!handle.has_operator());
        handle.install(Arc::new(CountingOperator {
            cancels: Arc::new(AtomicUsize::new(0)),
            invokes: Arc::new(AtomicUsize::new(0)),
        }));
        assert!(handle.has_operator());
        handle.clear();
        assert!(!handle.has_operator());
    }
}
