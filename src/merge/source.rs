//! Per-input merge state.
//!
//! A [`Source`] wraps one [`CaptureReader`] and an optional [`RecordFilter`]
//! and keeps exactly one accepted record buffered ahead of the scheduler.
//!
//! ## Design Principles
//!
//! - Generic over reader and filter (no Box<dyn> in the merge loop)
//! - Filtering happens during refill, so the scheduler only sees matches
//! - Status only moves out of `Active`, never back

use tracing::{debug, warn};

use crate::error::{Error, MergeError};
use crate::pcap::{PacketRecord, Timestamp};

/// Sequential reader of packet records from one capture.
pub trait CaptureReader {
    /// Read the next record. `Ok(None)` marks a clean end of the capture.
    fn next_record(&mut self) -> Result<Option<PacketRecord>, Error>;

    /// Link-layer type of every record in this capture.
    fn link_type(&self) -> u32;

    /// Snapshot length advertised by the capture.
    fn snaplen(&self) -> u32;
}

/// Predicate deciding whether a record is kept.
pub trait RecordFilter {
    fn matches(&self, record: &PacketRecord) -> bool;
}

/// Lifecycle state of a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    /// A matching record is buffered
    Active,
    /// The reader reached a clean end
    Exhausted,
    /// The reader returned an error; no more records will be read
    Failed { reason: String },
}

impl SourceStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SourceStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Exhausted => "exhausted",
            SourceStatus::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Record counters for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Records read from the capture
    pub read: u64,
    /// Records rejected by the filter
    pub filtered: u64,
    /// Records handed to the scheduler
    pub emitted: u64,
}

/// One merge input: a reader, its filter and a one-record look-ahead.
#[derive(Debug)]
pub struct Source<R, F> {
    index: usize,
    name: String,
    reader: R,
    filter: Option<F>,
    lookahead: Option<PacketRecord>,
    status: SourceStatus,
    stats: SourceStats,
    last_timestamp: Option<Timestamp>,
    warned_out_of_order: bool,
}

impl<R: CaptureReader, F: RecordFilter> Source<R, F> {
    /// Wrap `reader` and buffer its first matching record.
    ///
    /// `index` is the input position used to break timestamp ties.
    pub fn new(index: usize, name: impl Into<String>, reader: R, filter: Option<F>) -> Self {
        let mut source = Self {
            index,
            name: name.into(),
            reader,
            filter,
            lookahead: None,
            status: SourceStatus::Active,
            stats: SourceStats::default(),
            last_timestamp: None,
            warned_out_of_order: false,
        };
        source.refill();
        source
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &SourceStatus {
        &self.status
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    pub fn link_type(&self) -> u32 {
        self.reader.link_type()
    }

    pub fn snaplen(&self) -> u32 {
        self.reader.snaplen()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The buffered record, present exactly when the source is active.
    pub fn peek(&self) -> Option<&PacketRecord> {
        self.lookahead.as_ref()
    }

    /// Take the buffered record and read ahead to the next match.
    pub fn consume(&mut self) -> Result<PacketRecord, MergeError> {
        let Some(record) = self.lookahead.take() else {
            return Err(MergeError::SourceNotActive {
                index: self.index,
                name: self.name.clone(),
                status: self.status.as_str(),
            });
        };
        self.stats.emitted += 1;
        self.refill();
        Ok(record)
    }

    /// Read until a record passes the filter, the reader ends, or it fails.
    fn refill(&mut self) {
        if !self.status.is_active() {
            return;
        }

        loop {
            match self.reader.next_record() {
                Ok(Some(record)) => {
                    self.stats.read += 1;
                    self.check_order(record.timestamp);

                    let accepted = self
                        .filter
                        .as_ref()
                        .map_or(true, |filter| filter.matches(&record));
                    if accepted {
                        self.lookahead = Some(record);
                        return;
                    }
                    self.stats.filtered += 1;
                }
                Ok(None) => {
                    debug!(
                        source = %self.name,
                        read = self.stats.read,
                        "Source exhausted"
                    );
                    self.status = SourceStatus::Exhausted;
                    return;
                }
                Err(e) => {
                    warn!(
                        source = %self.name,
                        read = self.stats.read,
                        "Read error, dropping source from merge: {}", e
                    );
                    self.status = SourceStatus::Failed {
                        reason: e.to_string(),
                    };
                    return;
                }
            }
        }
    }

    fn check_order(&mut self, timestamp: Timestamp) {
        if let Some(last) = self.last_timestamp {
            if timestamp < last && !self.warned_out_of_order {
                warn!(
                    source = %self.name,
                    record = self.stats.read,
                    "Timestamp {} goes back from {}, output will be out of order",
                    timestamp,
                    last
                );
                self.warned_out_of_order = true;
            }
        }
        self.last_timestamp = Some(timestamp);
    }
}
