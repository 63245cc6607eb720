//! mungecap - Merge capture files in chronological order.
//!
//! This library reads PCAP/PCAPNG files (optionally gzipped), filters their
//! packets with tcpdump-style expressions and merges them into a single
//! classic PCAP file ordered by timestamp.
//!
//! # Example
//!
//! ```no_run
//! use mungecap::merge::{merge_files, MergeOptions};
//!
//! fn main() -> mungecap::Result<()> {
//!     let options = MergeOptions::new(
//!         vec!["eth0.pcap".into(), "eth1.pcapng".into()],
//!         "merged.pcap",
//!     )
//!     .with_filter("not arp");
//!     let summary = merge_files(&options)?;
//!     println!("{} packets merged", summary.emitted);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod filter;
pub mod merge;
pub mod pcap;

pub use error::{Error, Result};
