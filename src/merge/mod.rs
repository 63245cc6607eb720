//! Chronological merge of capture files.
//!
//! Each input becomes a [`Source`] holding one filtered record of
//! look-ahead. The [`MergeScheduler`] repeatedly emits the earliest of those
//! records to a [`RecordSink`] until every source is exhausted or has failed.
//!
//! Setup is fail-fast: any input that cannot be opened, or a filter that
//! cannot be compiled, aborts the merge before the output is created. Once
//! merging has started a read error only retires the affected source.
//!
//! # Example
//!
//! ```no_run
//! use mungecap::merge::{merge_files, MergeOptions};
//!
//! let options = MergeOptions::new(vec!["a.pcap".into(), "b.pcap".into()], "out.pcap")
//!     .with_filter("tcp port 443");
//! let summary = merge_files(&options)?;
//! println!("{} packets", summary.emitted);
//! # Ok::<(), mungecap::Error>(())
//! ```

mod progress;
mod scheduler;
mod source;

#[cfg(test)]
pub mod test_utils;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

pub use progress::MergeProgress;
pub use scheduler::{MergeScheduler, RecordSink};
pub use source::{CaptureReader, RecordFilter, Source, SourceStats, SourceStatus};

use crate::error::{Error, MergeError, Result};
use crate::filter::PacketFilter;
use crate::pcap::{PcapReader, PcapWriter};

/// What to merge and how.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Input captures, in tie-break order
    pub inputs: Vec<PathBuf>,
    /// Output capture; a `.gz` extension compresses it
    pub output: PathBuf,
    /// Filter expression applied to every input
    pub filter: Option<String>,
    /// Reject inputs whose link type differs from the first input's
    pub strict_link_type: bool,
    /// Show a running packet count on stderr
    pub show_progress: bool,
}

impl MergeOptions {
    pub fn new(inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn strict_link_type(mut self, strict: bool) -> Self {
        self.strict_link_type = strict;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// The filter to compile, if any. A blank expression keeps every packet.
    pub fn filter_expression(&self) -> Option<&str> {
        self.filter
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// Outcome for one input.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub path: String,
    pub link_type: u32,
    pub stats: SourceStats,
    pub status: SourceStatus,
}

/// Outcome of a completed merge.
#[derive(Debug, Clone)]
pub struct MergeSummary {
    /// Records written to the output
    pub emitted: u64,
    /// Link type written to the output header
    pub link_type: u32,
    /// Snap length written to the output header
    pub snaplen: u32,
    /// Per-input results, in input order
    pub sources: Vec<SourceSummary>,
}

impl MergeSummary {
    /// Inputs dropped from the merge because of a read error.
    pub fn failed(&self) -> impl Iterator<Item = &SourceSummary> {
        self.sources
            .iter()
            .filter(|s| matches!(s.status, SourceStatus::Failed { .. }))
    }
}

/// Open `path` as merge input number `index`, compiling `filter` for its link type.
pub fn open_source(
    index: usize,
    path: &Path,
    filter: Option<&str>,
) -> Result<Source<PcapReader, PacketFilter>> {
    let name = path.display().to_string();
    let reader = PcapReader::open(path).map_err(|e| with_path(&name, e))?;

    let filter = filter
        .map(|expr| PacketFilter::compile(expr, reader.link_type()))
        .transpose()
        .map_err(|e| with_path(&name, e.into()))?;

    debug!(
        source = %name,
        index,
        link_type = reader.link_type(),
        snaplen = reader.snaplen(),
        format = ?reader.format(),
        "Opened input"
    );
    Ok(Source::new(index, name, reader, filter))
}

/// Attach the input path to an error that does not already carry it.
fn with_path(path: &str, err: Error) -> Error {
    match err {
        Error::Pcap(crate::error::PcapError::Open { .. }) => err,
        other => MergeError::Input {
            path: path.to_string(),
            source: Box::new(other),
        }
        .into(),
    }
}

/// Compare every source's link type with the first one's.
///
/// Mismatches are logged, or rejected when `strict` is set.
pub fn check_link_types<R: CaptureReader, F: RecordFilter>(
    sources: &[Source<R, F>],
    strict: bool,
) -> Result<()> {
    let Some(first) = sources.first() else {
        return Ok(());
    };
    let expected = first.link_type();

    for source in &sources[1..] {
        let found = source.link_type();
        if found == expected {
            continue;
        }
        if strict {
            return Err(MergeError::LinkTypeMismatch {
                path: source.name().to_string(),
                found,
                expected,
                first: first.name().to_string(),
            }
            .into());
        }
        warn!(
            source = %source.name(),
            "Link type {} differs from {} ({}), records are copied unchanged",
            found,
            expected,
            first.name()
        );
    }
    Ok(())
}

/// Refuse to overwrite one of the inputs.
fn ensure_output_is_new(options: &MergeOptions) -> Result<()> {
    let Ok(output) = std::fs::canonicalize(&options.output) else {
        return Ok(());
    };
    let clash = options
        .inputs
        .iter()
        .any(|input| std::fs::canonicalize(input).is_ok_and(|p| p == output));
    if clash {
        return Err(MergeError::OutputIsInput {
            path: options.output.display().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Merge `options.inputs` into `options.output`.
pub fn merge_files(options: &MergeOptions) -> Result<MergeSummary> {
    if options.inputs.is_empty() {
        return Err(MergeError::NoInputs.into());
    }
    ensure_output_is_new(options)?;
    let filter = options.filter_expression();

    // Sources opened so far are dropped on the first failure
    let sources = options
        .inputs
        .iter()
        .enumerate()
        .map(|(index, path)| open_source(index, path, filter))
        .collect::<Result<Vec<_>>>()?;

    check_link_types(&sources, options.strict_link_type)?;

    let (link_type, snaplen) = (sources[0].link_type(), sources[0].snaplen());
    let mut writer = PcapWriter::create(&options.output, link_type, snaplen)?;

    info!(
        inputs = sources.len(),
        output = %options.output.display(),
        link_type,
        snaplen,
        filter = filter.unwrap_or(""),
        "Merging captures"
    );

    let progress = MergeProgress::new(options.show_progress);
    let mut scheduler = MergeScheduler::new(sources);

    let emitted = match scheduler.run(&mut writer, |n| progress.update(n)) {
        Ok(emitted) => emitted,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    writer.finish()?;
    progress.finish(emitted);

    let sources = scheduler
        .into_sources()
        .into_iter()
        .map(|source| SourceSummary {
            path: source.name().to_string(),
            link_type: source.link_type(),
            stats: source.stats(),
            status: source.status().clone(),
        })
        .collect();

    Ok(MergeSummary {
        emitted,
        link_type,
        snaplen,
        sources,
    })
}
