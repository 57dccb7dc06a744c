// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Default metric group implementation: a handful of atomic counters closed
//! exactly once by the Execution Driver's cleanup path. See spec.md §4.2
//! step 9 and §6 "Accessors: ... metric group".

use crate::contracts::MetricGroup;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-process metric group. Worker nodes that export to an external metrics
/// backend are expected to supply their own [`MetricGroup`] implementation;
/// this one is the default wired up when none is provided, and the one used
/// throughout the test suite.
#[derive(Default)]
pub struct AtomicMetricGroup {
    closed: AtomicBool,
    checkpoints_triggered: AtomicU64,
    checkpoints_declined: AtomicU64,
    checkpoints_completed: AtomicU64,
    cancel_requests: AtomicU64,
}

impl AtomicMetricGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_checkpoints_triggered(&self) {
        self.checkpoints_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_checkpoints_declined(&self) {
        self.checkpoints_declined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_checkpoints_completed(&self) {
        self.checkpoints_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cancel_requests(&self) {
        self.cancel_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricGroupSnapshot {
        MetricGroupSnapshot {
            checkpoints_triggered: self.checkpoints_triggered.load(Ordering::Relaxed),
            checkpoints_declined: self.checkpoints_declined.load(Ordering::Relaxed),
            checkpoints_completed: self.checkpoints_completed.load(Ordering::Relaxed),
            cancel_requests: self.cancel_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricGroupSnapshot {
    pub checkpoints_triggered: u64,
    pub checkpoints_declined: u64,
    pub checkpoints_completed: u64,
    pub cancel_requests: u64,
}

impl MetricGroup for AtomicMetricGroup {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = AtomicMetricGroup::new();
        metrics.inc_checkpoints_triggered();
        metrics.inc_checkpoints_triggered();
        metrics.inc_cancel_requests();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.checkpoints_triggered, 2);
        assert_eq!(snapshot.cancel_requests, 1);
        assert_eq!(snapshot.checkpoints_completed, 0);
    }

    #[test]
    fn close_is_observable_and_idempotent() {
        let metrics = AtomicMetricGroup::new();
        assert!(!metrics.is_closed());
        metrics.close();
        metrics.close();
        assert!(metrics.is_closed());
    }
}
