// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Resource Ledger — an ordered record of acquisitions made during
//! bootstrap, released in reverse order during cleanup. See spec.md §3
//! "Resource Ledger" and §4.2, invariant I4 ("every acquired entry is
//! released exactly once, in reverse acquisition order").

use oj_task_container_core::TaskIdentity;
use parking_lot::Mutex;
use std::sync::Arc;

/// One kind of resource the Execution Driver may have acquired during
/// bootstrap (spec.md §4.3 steps 1–10). Release behavior for each variant
/// is a no-op-on-failure: a release error is logged and cleanup continues
/// with the next entry, since partial cleanup is strictly better than
/// stopping (spec.md §7 "Cleanup never aborts").
pub enum LedgerEntry {
    BlobJobRegistration,
    ClassLoader,
    FileCacheEntry { entry_name: String },
    EventDispatcherRegistration,
    ProducedPartitions,
    InputGates,
    DistributedCacheFuture { entry_name: String },
    AsyncCallDispatcher,
    FsSafetyNet,
    MemoryAllocation { owner: &'static str },
    MetricGroup,
}

impl LedgerEntry {
    fn label(&self) -> &'static str {
        match self {
            LedgerEntry::BlobJobRegistration => "blob-job-registration",
            LedgerEntry::ClassLoader => "class-loader",
            LedgerEntry::FileCacheEntry { .. } => "file-cache-entry",
            LedgerEntry::EventDispatcherRegistration => "event-dispatcher-registration",
            LedgerEntry::ProducedPartitions => "produced-partitions",
            LedgerEntry::InputGates => "input-gates",
            LedgerEntry::DistributedCacheFuture { .. } => "distributed-cache-future",
            LedgerEntry::AsyncCallDispatcher => "async-call-dispatcher",
            LedgerEntry::FsSafetyNet => "fs-safety-net",
            LedgerEntry::MemoryAllocation { .. } => "memory-allocation",
            LedgerEntry::MetricGroup => "metric-group",
        }
    }
}

/// Closure invoked to release one ledger entry. Boxed since each entry's
/// release action closes over whatever collaborator handle acquired it.
type Release = Box<dyn FnOnce() -> Result<(), String> + Send>;

struct Entry {
    kind: LedgerEntry,
    release: Release,
}

/// Records acquisitions in order and releases them in reverse.
///
/// Not generic over a `Resource` trait — the entries in spec.md §4.2 are a
/// closed, heterogeneous set, so each is pushed as a label plus an erased
/// release closure rather than a trait object per collaborator type.
pub struct ResourceLedger {
    identity: Arc<TaskIdentity>,
    entries: Mutex<Vec<Entry>>,
}

impl ResourceLedger {
    pub fn new(identity: Arc<TaskIdentity>) -> Self {
        Self { identity, entries: Mutex::new(Vec::new()) }
    }

    /// Record a successful acquisition. `release` is called at most once,
    /// during [`ResourceLedger::release_all`].
    pub fn push(&self, kind: LedgerEntry, release: impl FnOnce() -> Result<(), String> + Send + 'static) {
        tracing::debug!(
            job_id = %self.identity.job_id,
            entry = kind.label(),
            "resource ledger: acquired",
        );
        self.entries.lock().push(Entry { kind, release: Box::new(release) });
    }

    /// Release every recorded entry in reverse acquisition order. Idempotent:
    /// the entry list is drained, so a second call releases nothing.
    /// Failures are logged, never propagated — see invariant I4 and
    /// spec.md §7.
    pub fn release_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries.into_iter().rev() {
            let label = entry.kind.label();
            match (entry.release)() {
                Ok(()) => {
                    tracing::debug!(
                        job_id = %self.identity.job_id,
                        entry = label,
                        "resource ledger: released",
                    );
                }
                Err(reason) => {
                    tracing::warn!(
                        job_id = %self.identity.job_id,
                        entry = label,
                        reason = %reason,
                        "resource ledger: release failed, continuing cleanup",
                    );
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ledger() -> ResourceLedger {
        ResourceLedger::new(Arc::new(TaskIdentity::builder().build()))
    }

    #[test]
    fn releases_in_reverse_order() {
        let ledger = ledger();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            ledger.push(LedgerEntry::MetricGroup, move || {
                order.lock().push(i);
                Ok(())
            });
        }
        ledger.release_all();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn release_all_drains_entries_and_is_idempotent() {
        let ledger = ledger();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        ledger.push(LedgerEntry::ClassLoader, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(ledger.len(), 1);
        ledger.release_all();
        assert_eq!(ledger.len(), 0);
        ledger.release_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_failing_release_does_not_stop_the_rest() {
        let ledger = ledger();
        let second_ran = Arc::new(AtomicUsize::new(0));
        let second_ran_clone = Arc::clone(&second_ran);

        ledger.push(LedgerEntry::FileCacheEntry { entry_name: "a".into() }, || {
            Err("disk unavailable".into())
        });
        ledger.push(LedgerEntry::BlobJobRegistration, move || {
            second_ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        ledger.release_all();
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }
}
