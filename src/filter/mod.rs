//! Packet filter expressions.
//!
//! Supports a tcpdump-like subset:
//! - Protocol: `tcp`, `udp`, `icmp`, `icmp6`, `arp`, `ip`, `ip6`
//! - Host: `host 192.168.1.1`, `src host 10.0.0.1`, `dst host ::1`
//! - Port: `port 80`, `src port 443`, `tcp dst port 22`, `dst udp port 53`
//! - Port range: `portrange 80-90`, `udp portrange 5000-6000`
//! - Network: `net 10.0.0.0/8`, `src net 192.168.0.0/16`
//! - IP protocol number: `proto 6`
//! - VLAN: `vlan`, `vlan 100`
//! - Boolean: `and`/`&&`, `or`/`||`, `not`/`!`, parentheses
//!
//! An empty expression is rejected by [`parse_filter`]; a merge given a
//! blank filter keeps every packet.
//!
//! # VLAN tags
//!
//! 802.1Q and 802.1ad tags on Ethernet frames are always skipped before the
//! network header is decoded, so `tcp port 443` also matches tagged frames.
//! tcpdump only looks past a tag after a `vlan` primitive; here `vlan` and
//! `vlan ID` only test for the tag itself.
//!
//! # Example
//!
//! ```
//! use mungecap::filter::PacketFilter;
//!
//! let filter = PacketFilter::compile("tcp port 80 and host 10.0.0.1", 1).unwrap();
//! assert_eq!(filter.expression(), "tcp port 80 and host 10.0.0.1");
//! ```

mod ast;
mod error;
mod matcher;
mod parser;

pub use ast::{
    ethertype, ip_proto, Direction, FilterExpr, IpVersion, Network, Primitive, Transport,
};
pub use error::FilterError;
pub use matcher::{LinkLayer, PacketFilter};
pub use parser::parse_filter;
