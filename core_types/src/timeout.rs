//! Timeout convention shared by every blocking call

use serde::{Deserialize, Serialize};

/// How long a blocking call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeout {
    /// Wait forever
    Pend,
    /// Do not wait at all
    Check,
    /// Wait up to this many milliseconds
    Millis(u32),
}

impl Timeout {
    /// Sentinel used by the numeric API for "wait forever"
    pub const PEND_RAW: i32 = -1;
    /// Sentinel used by the numeric API for "don't wait"
    pub const CHECK_RAW: i32 = 0;

    /// Decodes the numeric convention
    ///
    /// Any negative value waits forever, zero polls, a positive value is a
    /// millisecond budget.
    pub fn from_raw(msecs: i32) -> Self {
        match msecs {
            m if m < 0 => Timeout::Pend,
            0 => Timeout::Check,
            m => Timeout::Millis(m as u32),
        }
    }

    /// Encodes back into the numeric convention
    pub fn as_raw(&self) -> i32 {
        match self {
            Timeout::Pend => Self::PEND_RAW,
            Timeout::Check => Self::CHECK_RAW,
            Timeout::Millis(ms) => (*ms).min(i32::MAX as u32) as i32,
        }
    }
}

impl From<Option<u32>> for Timeout {
    fn from(value: Option<u32>) -> Self {
        match value {
            None => Timeout::Pend,
            Some(0) => Timeout::Check,
            Some(ms) => Timeout::Millis(ms),
        }
    }
}
