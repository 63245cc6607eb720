//! Capture file I/O.
//!
//! This module handles reading PCAP and PCAPNG files (optionally gzipped)
//! into [`PacketRecord`]s and writing records back out as classic PCAP.

mod format;
mod packet;
mod reader;
mod writer;

pub use format::{Compression, PcapFormat};
pub use packet::{PacketRecord, Timestamp};
pub use reader::PcapReader;
pub use writer::{OutputStream, PcapWriter};
