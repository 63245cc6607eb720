//! Fuzz target for capture file parsing.
//!
//! Tests handling of malformed PCAP/PCAPNG files including:
//! - Magic byte and gzip detection
//! - Global header and interface block parsing
//! - Packet record headers (caplen, origlen, timestamps)
//! - Endianness handling

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use mungecap::pcap::PcapReader;

fuzz_target!(|data: &[u8]| {
    let cursor = Cursor::new(data.to_vec());
    if let Ok(mut reader) = PcapReader::from_reader(cursor) {
        // Read until EOF or the first error - should never panic
        while let Ok(Some(_packet)) = reader.next_packet() {}
    }
});
