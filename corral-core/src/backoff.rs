//! Adaptive back-off for spin-poll waits.
//!
//! Escalates from busy spinning to yielding to short sleeps, so a waiter that
//! keeps failing burns progressively less CPU.
//!
//! # Performance Characteristics
//! - Spin phase: up to 2^6 `spin_loop` hints per step
//! - Yield phase: one `yield_now` per step
//! - Park phase: sleeps from 50µs doubling up to the configured ceiling

use std::thread;
use std::time::Duration;

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const BASE_PARK: Duration = Duration::from_micros(50);

/// Per-waiter back-off state.
#[derive(Debug, Clone)]
pub struct AdaptiveBackoff {
    step: u32,
    max_park: Duration,
}

impl AdaptiveBackoff {
    /// Create a back-off capped at 1ms per park.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_park(Duration::from_millis(1))
    }

    /// Create a back-off with a custom park ceiling.
    #[must_use]
    pub const fn with_max_park(max_park: Duration) -> Self {
        Self { step: 0, max_park }
    }

    /// Wait for one back-off step and escalate.
    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step <= YIELD_LIMIT {
            thread::yield_now();
        } else {
            thread::sleep(self.current_park());
        }
        self.step = self.step.saturating_add(1);
    }

    /// Return to the cheapest step after progress was made.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Whether the next snooze will put the thread to sleep.
    #[must_use]
    pub fn is_parking(&self) -> bool {
        self.step > YIELD_LIMIT
    }

    fn current_park(&self) -> Duration {
        let shift = (self.step - YIELD_LIMIT - 1).min(16);
        BASE_PARK.saturating_mul(1u32 << shift).min(self.max_park)
    }
}

impl Default for AdaptiveBackoff {
    fn default() -> Self {
        Self::new()
    }
}
