//! Packet record representation.

use std::fmt;

use bytes::Bytes;

/// Capture time of a packet, as seconds and microseconds since the epoch
/// shared by all captures being merged.
///
/// Ordering is lexicographic on `(secs, micros)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Whole seconds.
    pub secs: u64,
    /// Microseconds within the second (0..1_000_000).
    pub micros: u32,
}

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Self = Self { secs: 0, micros: 0 };

    /// Create a timestamp, carrying excess microseconds into seconds.
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + u64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// A packet read from a capture.
///
/// The link type is not stored here; it belongs to the capture the record
/// was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Capture time.
    pub timestamp: Timestamp,

    /// Original length on the wire.
    pub original_length: u32,

    /// Captured bytes (`captured_length()` of them).
    pub data: Bytes,
}

impl PacketRecord {
    /// Create a new record.
    pub fn new(timestamp: Timestamp, original_length: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        // A capture can never hold more than was on the wire.
        let original_length = original_length.max(data.len() as u32);
        Self {
            timestamp,
            original_length,
            data,
        }
    }

    /// Number of bytes actually captured.
    pub fn captured_length(&self) -> u32 {
        self.data.len() as u32
    }
}
