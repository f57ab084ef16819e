//! Tick conversions
//!
//! [`TickClock`] converts between wall-clock units and host kernel ticks.

use crate::kernel::Wait;
use core_types::Timeout;

/// Converts between microseconds and host kernel ticks
///
/// The tick rate is read once, and the per-tick period and clock accuracy
/// are derived from it up front. Microseconds round **up** to ticks so a
/// requested non-zero delay never collapses to zero ticks; ticks round
/// **down** to microseconds when reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    ticks_per_second: u32,
    micros_per_tick: u32,
    accuracy_ns: u32,
}

impl TickClock {
    const MICROS_PER_SEC: u128 = 1_000_000;

    /// Builds a converter for the given tick rate
    ///
    /// Returns `None` for a zero rate.
    pub fn new(ticks_per_second: u32) -> Option<Self> {
        if ticks_per_second == 0 {
            return None;
        }
        let micros_per_tick = (1_000_000 / ticks_per_second).max(1);
        let accuracy_ns = (1_000_000_000u64.div_ceil(ticks_per_second as u64)) as u32;
        Some(Self {
            ticks_per_second,
            micros_per_tick,
            accuracy_ns,
        })
    }

    /// Host tick rate
    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    /// Length of one tick in whole microseconds (at least 1)
    pub fn micros_per_tick(&self) -> u32 {
        self.micros_per_tick
    }

    /// Resolution of the tick source in nanoseconds
    pub fn accuracy_ns(&self) -> u32 {
        self.accuracy_ns
    }

    /// Microseconds to ticks, rounding up
    pub fn micros_to_ticks(&self, micros: u64) -> u64 {
        let scaled = micros as u128 * self.ticks_per_second as u128;
        let ticks = scaled.div_ceil(Self::MICROS_PER_SEC);
        ticks.min(u64::MAX as u128) as u64
    }

    /// Milliseconds to ticks, rounding up
    pub fn millis_to_ticks(&self, millis: u32) -> u64 {
        self.micros_to_ticks(millis as u64 * 1_000)
    }

    /// Ticks to microseconds, rounding down
    pub fn ticks_to_micros(&self, ticks: u64) -> u64 {
        let micros = ticks as u128 * Self::MICROS_PER_SEC / self.ticks_per_second as u128;
        micros.min(u64::MAX as u128) as u64
    }

    /// Rounds a microsecond period to what the tick source can actually deliver
    pub fn quantize_micros(&self, micros: u64) -> u64 {
        self.ticks_to_micros(self.micros_to_ticks(micros))
    }

    /// Translates a caller timeout into a host wait
    pub fn wait_for(&self, timeout: Timeout) -> Wait {
        match timeout {
            Timeout::Pend => Wait::Forever,
            Timeout::Check => Wait::Poll,
            Timeout::Millis(ms) => Wait::Ticks(self.millis_to_ticks(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tick_clock_rejects_zero_rate() {
        assert!(TickClock::new(0).is_none());
    }

    #[test]
    fn test_tick_clock_rounds_up_to_ticks() {
        let clock = TickClock::new(100).unwrap();
        assert_eq!(clock.micros_to_ticks(0), 0);
        assert_eq!(clock.micros_to_ticks(1), 1);
        assert_eq!(clock.micros_to_ticks(10_000), 1);
        assert_eq!(clock.micros_to_ticks(10_001), 2);
        assert_eq!(clock.millis_to_ticks(25), 3);
    }

    #[test]
    fn test_tick_clock_rounds_down_to_micros() {
        let clock = TickClock::new(3).unwrap();
        assert_eq!(clock.ticks_to_micros(1), 333_333);
        assert_eq!(clock.micros_per_tick(), 333_333);
        assert_eq!(clock.accuracy_ns(), 333_333_334);
    }

    #[test]
    fn test_tick_clock_fast_rate() {
        let clock = TickClock::new(2_000_000).unwrap();
        assert_eq!(clock.micros_per_tick(), 1);
        assert_eq!(clock.micros_to_ticks(3), 6);
        assert_eq!(clock.ticks_to_micros(5), 2);
    }

    #[test]
    fn test_wait_for_timeout() {
        let clock = TickClock::new(1000).unwrap();
        assert_eq!(clock.wait_for(Timeout::Pend), Wait::Forever);
        assert_eq!(clock.wait_for(Timeout::Check), Wait::Poll);
        assert_eq!(clock.wait_for(Timeout::Millis(200)), Wait::Ticks(200));
    }

    #[test]
    fn test_quantize() {
        let clock = TickClock::new(100).unwrap();
        assert_eq!(clock.quantize_micros(15_000), 20_000);
    }

    proptest! {
        #[test]
        fn prop_micros_round_trip_never_undercovers(
            rate in 1u32..=1_000_000,
            micros in 0u64..=u32::MAX as u64 * 4,
        ) {
            let clock = TickClock::new(rate).unwrap();
            prop_assert!(clock.ticks_to_micros(clock.micros_to_ticks(micros)) >= micros);
        }
    }
}
