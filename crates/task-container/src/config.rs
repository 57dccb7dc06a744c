// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task container configuration: process-wide environment defaults,
//! overridable per job by the deployed execution configuration. See
//! spec.md §6 "Configuration".

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval at which the Cancellation Orchestrator's canceller thread
/// re-delivers `cancel()` to a still-running operator.
fn cancellation_interval_ms() -> Option<u64> {
    std::env::var("TASK_CANCELLATION_INTERVAL_MS").ok().and_then(|s| s.parse().ok())
}

/// Hard deadline after which the watchdog daemon escalates a stuck
/// cancellation to a fatal, process-wide error. `0` disables the watchdog
/// entirely (spec.md §4.4 "a zero timeout means: never escalate").
fn cancellation_timeout_ms() -> Option<u64> {
    std::env::var("TASK_CANCELLATION_TIMEOUT_MS").ok().and_then(|s| s.parse().ok())
}

fn halt_on_oom() -> Option<bool> {
    std::env::var("TASK_HALT_ON_OOM").ok().and_then(|s| s.parse().ok())
}

/// Per-job override surface, deserialized from the execution configuration
/// the worker node attaches to a deployment. Any field left `None` falls
/// back to the process-wide environment default, which in turn falls back
/// to the hardcoded default below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfigOverrides {
    pub cancellation_interval_ms: Option<u64>,
    pub cancellation_timeout_ms: Option<u64>,
    pub halt_on_oom: Option<bool>,
}

/// Fully resolved configuration for one task container instance.
#[derive(Debug, Clone, Copy)]
pub struct TaskContainerConfig {
    pub cancellation_interval: Duration,
    /// `None` means the watchdog is disabled (timeout of 0).
    pub cancellation_timeout: Option<Duration>,
    pub halt_on_oom: bool,
}

impl TaskContainerConfig {
    const DEFAULT_CANCELLATION_INTERVAL_MS: u64 = 5_000;
    const DEFAULT_CANCELLATION_TIMEOUT_MS: u64 = 30_000;
    const DEFAULT_HALT_ON_OOM: bool = false;

    /// Resolve from process environment, then apply `overrides` on top.
    pub fn resolve(overrides: &ExecutionConfigOverrides) -> Self {
        let interval_ms = overrides
            .cancellation_interval_ms
            .or_else(cancellation_interval_ms)
            .unwrap_or(Self::DEFAULT_CANCELLATION_INTERVAL_MS);

        let timeout_ms = overrides
            .cancellation_timeout_ms
            .or_else(cancellation_timeout_ms)
            .unwrap_or(Self::DEFAULT_CANCELLATION_TIMEOUT_MS);

        let halt_on_oom =
            overrides.halt_on_oom.or_else(halt_on_oom).unwrap_or(Self::DEFAULT_HALT_ON_OOM);

        Self {
            cancellation_interval: Duration::from_millis(interval_ms),
            cancellation_timeout: if timeout_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(timeout_ms))
            },
            halt_on_oom,
        }
    }
}

impl Default for TaskContainerConfig {
    fn default() -> Self {
        Self::resolve(&ExecutionConfigOverrides::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_with_no_overrides() {
        let config = TaskContainerConfig::resolve(&ExecutionConfigOverrides::default());
        assert_eq!(config.cancellation_interval, Duration::from_millis(5_000));
        assert_eq!(config.cancellation_timeout, Some(Duration::from_millis(30_000)));
        assert!(!config.halt_on_oom);
    }

    #[test]
    fn per_job_overrides_win_over_defaults() {
        let overrides = ExecutionConfigOverrides {
            cancellation_interval_ms: Some(1_000),
            cancellation_timeout_ms: Some(2_000),
            halt_on_oom: Some(true),
        };
        let config = TaskContainerConfig::resolve(&overrides);
        assert_eq!(config.cancellation_interval, Duration::from_millis(1_000));
        assert_eq!(config.cancellation_timeout, Some(Duration::from_millis(2_000)));
        assert!(config.halt_on_oom);
    }

    #[test]
    fn zero_timeout_disables_watchdog() {
        let overrides = ExecutionConfigOverrides {
            cancellation_timeout_ms: Some(0),
            ..Default::default()
        };
        let config = TaskContainerConfig::resolve(&overrides);
        assert_eq!(config.cancellation_timeout, None);
    }
}
