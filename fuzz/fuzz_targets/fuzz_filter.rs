//! Fuzz target for the filter expression parser and matcher.
//!
//! The first byte selects a link type, the next two give the expression
//! length, then the expression text and finally the packet bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mungecap::filter::{parse_filter, PacketFilter};

const LINK_TYPES: [u32; 8] = [0, 1, 12, 101, 113, 228, 229, 127];

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let link_type = LINK_TYPES[usize::from(data[0]) % LINK_TYPES.len()];
    let expr_len = usize::from(u16::from_le_bytes([data[1], data[2]]));
    let rest = &data[3..];
    let (expr, packet) = rest.split_at(expr_len.min(rest.len()));

    let Ok(expr) = std::str::from_utf8(expr) else {
        return;
    };

    // Parsing should never panic, only return Ok or Err
    let _ = parse_filter(expr);

    // Neither should matching arbitrary bytes
    if let Ok(filter) = PacketFilter::compile(expr, link_type) {
        let _ = filter.matches_bytes(packet);
    }
});
