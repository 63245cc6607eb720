//! Error types for mungecap.
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`PcapError`] - Errors from reading or writing capture files
//! - [`FilterError`] - Errors from compiling filter expressions
//! - [`MergeError`] - Errors from setting up or driving a merge

use thiserror::Error;

pub use crate::filter::FilterError;

/// Main error type for mungecap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading, parsing or writing a capture file
    #[error("PCAP error: {0}")]
    Pcap(#[from] PcapError),

    /// Error compiling a filter expression
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Error setting up or driving the merge
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to capture files.
#[derive(Error, Debug)]
pub enum PcapError {
    /// File not found or not readable
    #[error("Cannot open {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Output file cannot be created
    #[error("Cannot create {path}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid PCAP format
    #[error("Invalid PCAP format: {reason}")]
    InvalidFormat { reason: String },

    /// Timestamp cannot be represented in the output format
    #[error("Timestamp {secs}s does not fit in a classic pcap record")]
    TimestampOverflow { secs: u64 },
}

/// Errors related to the merge itself.
#[derive(Error, Debug)]
pub enum MergeError {
    /// No inputs were given
    #[error("No input files specified")]
    NoInputs,

    /// An input's link type differs from the first input's
    #[error(
        "Link type mismatch: {path} has link type {found}, output uses {expected} (from {first})"
    )]
    LinkTypeMismatch {
        path: String,
        found: u32,
        expected: u32,
        first: String,
    },

    /// An input could not be opened as a merge source
    #[error("Cannot use input {path}")]
    Input {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// The output path names one of the inputs
    #[error("Output file {path} is also an input")]
    OutputIsInput { path: String },

    /// A record was requested from a source with no look-ahead
    #[error("Source {index} ({name}) consumed while {status}")]
    SourceNotActive {
        index: usize,
        name: String,
        status: &'static str,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
