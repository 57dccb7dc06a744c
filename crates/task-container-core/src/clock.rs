// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction so cancellation-interval/timeout logic is testable
//! without sleeping in real time.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that provides the current time and can be asked to sleep.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Block the calling thread until `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration);
}

/// Real system clock; `sleep` is `std::thread::sleep`.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fake clock for deterministic tests.
///
/// `sleep` does not actually block; it advances the clock immediately and
/// returns. Tests that need to observe a thread "waiting" should instead
/// synchronize on a channel or barrier and use [`FakeClock::advance`] from
/// the controlling thread when they want `now()` to move.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { current: Arc::new(Mutex::new(Instant::now())) }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advance_moves_now() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + Duration::from_secs(5));
    }

    #[test]
    fn fake_clock_sleep_advances_without_blocking() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(200));
        assert!(clock.now() >= start + Duration::from_millis(200));
    }
}
