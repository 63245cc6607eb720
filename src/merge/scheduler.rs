//! Chronological selection across sources.

use super::source::{CaptureReader, RecordFilter, Source};
use crate::error::Error;
use crate::pcap::PacketRecord;

/// Destination for merged records.
pub trait RecordSink {
    fn write_record(&mut self, record: &PacketRecord) -> Result<(), Error>;
}

/// Emits the earliest buffered record across a set of sources, one per step.
///
/// Ties on timestamp go to the source with the lowest input index, so the
/// output does not depend on scan order.
#[derive(Debug)]
pub struct MergeScheduler<R, F> {
    sources: Vec<Source<R, F>>,
    emitted: u64,
}

impl<R: CaptureReader, F: RecordFilter> MergeScheduler<R, F> {
    pub fn new(sources: Vec<Source<R, F>>) -> Self {
        Self {
            sources,
            emitted: 0,
        }
    }

    /// Position of the active source holding the earliest record.
    pub fn select_next(&self) -> Option<usize> {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(pos, source)| {
                source
                    .peek()
                    .map(|record| (pos, (record.timestamp, source.index())))
            })
            .min_by_key(|&(_, key)| key)
            .map(|(pos, _)| pos)
    }

    /// Move one record to `sink`. Returns `false` once every source is done.
    pub fn step<S: RecordSink>(&mut self, sink: &mut S) -> Result<bool, Error> {
        let Some(pos) = self.select_next() else {
            return Ok(false);
        };

        let record = self.sources[pos].consume()?;
        sink.write_record(&record)?;
        self.emitted += 1;
        Ok(true)
    }

    /// Step until done, calling `on_record` with the running count.
    pub fn run<S: RecordSink>(
        &mut self,
        sink: &mut S,
        mut on_record: impl FnMut(u64),
    ) -> Result<u64, Error> {
        while self.step(sink)? {
            on_record(self.emitted);
        }
        Ok(self.emitted)
    }

    /// Records emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn sources(&self) -> &[Source<R, F>] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<Source<R, F>> {
        self.sources
    }
}
