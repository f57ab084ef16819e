//! # Simulated Tick Source
//!
//! Monotonic tick counter derived from the host's `std::time::Instant`.
//!
//! Ticks are computed from elapsed wall time at a configurable rate, so
//! a 1000 Hz clock reports one tick per elapsed millisecond.

use kernel_api::Wait;
use std::time::{Duration as StdDuration, Instant as StdInstant};

/// Monotonic tick source
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    epoch: StdInstant,
    tick_rate_hz: u32,
}

impl SimClock {
    /// Default tick rate, one tick per millisecond
    pub const DEFAULT_TICK_RATE_HZ: u32 = 1000;

    /// Creates a clock starting at tick 0 now
    ///
    /// A zero rate is bumped to 1 Hz.
    pub fn new(tick_rate_hz: u32) -> Self {
        Self {
            epoch: StdInstant::now(),
            tick_rate_hz: tick_rate_hz.max(1),
        }
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Ticks elapsed since the clock was created
    pub fn tick_count(&self) -> u64 {
        let nanos = self.epoch.elapsed().as_nanos();
        (nanos * self.tick_rate_hz as u128 / 1_000_000_000) as u64
    }

    /// Wall-clock length of `ticks`
    pub fn ticks_to_std(&self, ticks: u64) -> StdDuration {
        let nanos = ticks as u128 * 1_000_000_000 / self.tick_rate_hz as u128;
        StdDuration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Resolves a host wait into an absolute deadline
    pub(crate) fn deadline(&self, wait: Wait) -> Deadline {
        match wait {
            Wait::Forever => Deadline::Never,
            Wait::Poll => Deadline::Now,
            Wait::Ticks(0) => Deadline::Now,
            Wait::Ticks(ticks) => match StdInstant::now().checked_add(self.ticks_to_std(ticks)) {
                Some(at) => Deadline::At(at),
                None => Deadline::Never,
            },
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TICK_RATE_HZ)
    }
}

/// Absolute end of a blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Never,
    Now,
    At(StdInstant),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SimClock::new(1000);
        let t1 = clock.tick_count();
        std::thread::sleep(StdDuration::from_millis(5));
        let t2 = clock.tick_count();
        assert!(t2 >= t1 + 4);
    }

    #[test]
    fn test_zero_rate_is_bumped() {
        assert_eq!(SimClock::new(0).tick_rate_hz(), 1);
    }

    #[test]
    fn test_ticks_to_std() {
        let clock = SimClock::new(100);
        assert_eq!(clock.ticks_to_std(3), StdDuration::from_millis(30));
    }

    #[test]
    fn test_deadlines() {
        let clock = SimClock::new(1000);
        assert_eq!(clock.deadline(Wait::Forever), Deadline::Never);
        assert_eq!(clock.deadline(Wait::Poll), Deadline::Now);
        assert_eq!(clock.deadline(Wait::Ticks(0)), Deadline::Now);
        assert!(matches!(clock.deadline(Wait::Ticks(10)), Deadline::At(_)));
    }
}
