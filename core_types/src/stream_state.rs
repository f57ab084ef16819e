//! Readiness flags for streams

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Readiness directions a caller asks about and gets confirmed back
    ///
    /// A select call receives the requested bits and returns only the
    /// subset that was confirmed ready.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StreamState: u32 {
        const READABLE = 0x01;
        const WRITABLE = 0x02;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let both = StreamState::READABLE | StreamState::WRITABLE;
        assert!(both.contains(StreamState::READABLE));
        assert!(both.contains(StreamState::WRITABLE));
        assert_eq!(both.bits(), 0x03);
    }

    #[test]
    fn test_empty_request() {
        assert!(StreamState::empty().is_empty());
    }
}
