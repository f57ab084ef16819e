//! Tick conversions and local time
//!
//! Local time is the host's monotonic uptime plus an offset that
//! [`Osal::set_local_time`] adjusts. Nothing here touches a wall clock.

use crate::error::{OsalError, OsalResult};
use crate::Osal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Seconds plus microseconds, with `0 <= microsecs < 1_000_000`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OsTime {
    pub seconds: i64,
    pub microsecs: u32,
}

impl OsTime {
    pub fn new(seconds: i64, microsecs: u32) -> Self {
        Self { seconds, microsecs }
    }

    /// Normalises a signed microsecond count
    pub fn from_micros(micros: i64) -> Self {
        Self {
            seconds: micros.div_euclid(MICROS_PER_SEC),
            microsecs: micros.rem_euclid(MICROS_PER_SEC) as u32,
        }
    }

    pub fn as_micros(&self) -> i64 {
        self.seconds
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(i64::from(self.microsecs))
    }
}

impl Osal {
    pub fn ticks_per_second(&self) -> u32 {
        self.clock.ticks_per_second()
    }

    /// Milliseconds to host ticks, rounding up
    pub fn milli_to_ticks(&self, millis: u32) -> u64 {
        self.clock.millis_to_ticks(millis)
    }

    /// Length of one host tick in microseconds
    pub fn tick_to_micros(&self) -> u32 {
        self.clock.micros_per_tick()
    }

    fn uptime_micros(&self) -> i64 {
        let micros = self.clock.ticks_to_micros(self.kernel.tick_count());
        i64::try_from(micros).unwrap_or(i64::MAX)
    }

    pub fn get_local_time(&self) -> OsTime {
        let offset = self.local_offset_us.load(Ordering::Acquire);
        OsTime::from_micros(self.uptime_micros().saturating_add(offset))
    }

    pub fn set_local_time(&self, time: OsTime) -> OsalResult<()> {
        if i64::from(time.microsecs) >= MICROS_PER_SEC {
            return Err(OsalError::InvalidArgument(format!(
                "{} microseconds is not below one second",
                time.microsecs
            )));
        }
        let offset = time.as_micros().saturating_sub(self.uptime_micros());
        self.local_offset_us.store(offset, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_normalisation() {
        assert_eq!(OsTime::from_micros(1_500_000), OsTime::new(1, 500_000));
        assert_eq!(OsTime::from_micros(-1), OsTime::new(-1, 999_999));
        assert_eq!(OsTime::new(2, 5).as_micros(), 2_000_005);
    }

    #[test]
    fn test_tick_conversions() {
        let osal = test_support::osal();
        assert_eq!(osal.ticks_per_second(), 1000);
        assert_eq!(osal.tick_to_micros(), 1000);
        assert_eq!(osal.milli_to_ticks(25), 25);
    }

    #[test]
    fn test_local_time_advances_from_set_point() {
        let osal = test_support::osal();
        osal.set_local_time(OsTime::new(1_000, 0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let now = osal.get_local_time();
        assert!(now >= OsTime::new(1_000, 10_000));
        assert!(now < OsTime::new(1_010, 0));
    }

    #[test]
    fn test_rejects_unnormalised_time() {
        let osal = test_support::osal();
        assert!(matches!(
            osal.set_local_time(OsTime::new(0, 1_000_000)),
            Err(OsalError::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_from_micros_round_trips(micros in -1_000_000_000_000i64..1_000_000_000_000i64) {
            let time = OsTime::from_micros(micros);
            prop_assert!(time.microsecs < 1_000_000);
            prop_assert_eq!(time.as_micros(), micros);
        }
    }
}
