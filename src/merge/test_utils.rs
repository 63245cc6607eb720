//! Test utilities for the merge engine.
//!
//! Provides scripted readers, filters and sinks so merge behaviour can be
//! checked without touching the filesystem.

use std::collections::VecDeque;

use super::{CaptureReader, RecordFilter, RecordSink};
use crate::error::{Error, PcapError};
use crate::pcap::{PacketRecord, Timestamp};

/// Record at `secs` whose single payload byte is `tag`.
pub fn tagged(secs: u64, tag: u8) -> PacketRecord {
    PacketRecord::new(Timestamp::new(secs, 0), 1, vec![tag])
}

/// Untagged record at `secs`.
pub fn record(secs: u64) -> PacketRecord {
    tagged(secs, 0)
}

/// Seconds of each record's timestamp.
pub fn timestamps(records: &[PacketRecord]) -> Vec<u64> {
    records.iter().map(|r| r.timestamp.secs).collect()
}

/// Payload tag of each record.
pub fn tags(records: &[PacketRecord]) -> Vec<u8> {
    records.iter().map(|r| r.data[0]).collect()
}

/// Reader that replays a fixed list of records, optionally failing part way.
#[derive(Debug)]
pub struct ScriptedReader {
    records: VecDeque<PacketRecord>,
    fail_after: Option<usize>,
    delivered: usize,
    link_type: u32,
    snaplen: u32,
}

impl ScriptedReader {
    pub fn new(records: Vec<PacketRecord>) -> Self {
        Self {
            records: records.into(),
            fail_after: None,
            delivered: 0,
            link_type: 1,
            snaplen: 65535,
        }
    }

    pub fn with_times(times: &[u64]) -> Self {
        Self::new(times.iter().map(|&t| record(t)).collect())
    }

    pub fn with_tagged_times(times: &[u64], tag: u8) -> Self {
        Self::new(times.iter().map(|&t| tagged(t, tag)).collect())
    }

    /// Return an error instead of the record following the first `n`.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_link_type(mut self, link_type: u32, snaplen: u32) -> Self {
        self.link_type = link_type;
        self.snaplen = snaplen;
        self
    }
}

impl CaptureReader for ScriptedReader {
    fn next_record(&mut self) -> Result<Option<PacketRecord>, Error> {
        if self.fail_after == Some(self.delivered) {
            return Err(PcapError::InvalidFormat {
                reason: format!("Parse error after frame {}", self.delivered),
            }
            .into());
        }
        self.delivered += 1;
        Ok(self.records.pop_front())
    }

    fn link_type(&self) -> u32 {
        self.link_type
    }

    fn snaplen(&self) -> u32 {
        self.snaplen
    }
}

/// Filter on timestamp seconds.
#[derive(Debug, Clone, Copy)]
pub struct SecondsFilter(pub fn(u64) -> bool);

impl SecondsFilter {
    pub fn even() -> Self {
        Self(|secs| secs % 2 == 0)
    }
}

impl RecordFilter for SecondsFilter {
    fn matches(&self, record: &PacketRecord) -> bool {
        (self.0)(record.timestamp.secs)
    }
}

/// Sink collecting records in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<PacketRecord>,
}

impl RecordSink for VecSink {
    fn write_record(&mut self, record: &PacketRecord) -> Result<(), Error> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Sink that fails every write.
#[derive(Debug, Default)]
pub struct BrokenSink;

impl RecordSink for BrokenSink {
    fn write_record(&mut self, _record: &PacketRecord) -> Result<(), Error> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
    }
}
