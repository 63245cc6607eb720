//! Compiled filters evaluated against captured packet bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice,
};

use super::ast::{ethertype, ip_proto, FilterExpr, IpVersion, Primitive, Transport};
use super::error::FilterError;
use super::parser::parse_filter;
use crate::merge::RecordFilter;
use crate::pcap::PacketRecord;

/// IPv6 extension header numbers walked before the transport header.
mod next_header {
    pub const HOP_BY_HOP: u8 = 0;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const AH: u8 = 51;
    pub const DESTINATION: u8 = 60;
}

/// Upper bound on chained IPv6 extension headers.
const MAX_EXTENSION_HEADERS: usize = 8;

/// Link-layer framing of the packets a filter is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    /// BSD loopback: 4-byte address family in host byte order
    Null,
    /// Ethernet II, with optional 802.1Q/802.1ad tags
    Ethernet,
    /// Raw IP, version taken from the first nibble
    RawIp,
    /// Linux cooked capture v1
    LinuxSll,
    /// Raw IPv4 only
    Ipv4,
    /// Raw IPv6 only
    Ipv6,
}

impl LinkLayer {
    /// Map a LINKTYPE_/DLT_ value to a supported link layer.
    pub fn from_link_type(link_type: u32) -> Option<Self> {
        match link_type {
            0 => Some(LinkLayer::Null),
            1 => Some(LinkLayer::Ethernet),
            12 | 14 | 101 => Some(LinkLayer::RawIp),
            113 => Some(LinkLayer::LinuxSll),
            228 => Some(LinkLayer::Ipv4),
            229 => Some(LinkLayer::Ipv6),
            _ => None,
        }
    }

    /// Strip the link header, returning VLAN ids, ethertype and network payload.
    fn decode<'a>(&self, data: &'a [u8]) -> Option<(Vec<u16>, u16, &'a [u8])> {
        match self {
            LinkLayer::Ethernet => {
                let eth = Ethernet2HeaderSlice::from_slice(data).ok()?;
                let mut ether_type = eth.ether_type().0;
                let mut payload = &data[eth.slice().len()..];
                let mut vlan_ids = Vec::new();

                while matches!(
                    ether_type,
                    ethertype::VLAN | ethertype::QINQ | ethertype::QINQ_LEGACY
                ) && payload.len() >= 4
                {
                    let tci = u16::from_be_bytes([payload[0], payload[1]]);
                    vlan_ids.push(tci & 0x0fff);
                    ether_type = u16::from_be_bytes([payload[2], payload[3]]);
                    payload = &payload[4..];
                }
                Some((vlan_ids, ether_type, payload))
            }
            LinkLayer::LinuxSll => {
                if data.len() < 16 {
                    return None;
                }
                let protocol = u16::from_be_bytes([data[14], data[15]]);
                Some((Vec::new(), protocol, &data[16..]))
            }
            LinkLayer::Null => {
                let family: [u8; 4] = data.get(..4)?.try_into().ok()?;
                // Written in the capturing host's byte order
                let le = u32::from_le_bytes(family);
                let family = if le > 0xffff {
                    u32::from_be_bytes(family)
                } else {
                    le
                };
                let ether_type = match family {
                    2 => ethertype::IPV4,
                    // AF_INET6 differs between BSDs, Darwin and Linux
                    10 | 24 | 28 | 30 => ethertype::IPV6,
                    _ => return None,
                };
                Some((Vec::new(), ether_type, &data[4..]))
            }
            LinkLayer::RawIp => {
                let ether_type = match data.first()? >> 4 {
                    4 => ethertype::IPV4,
                    6 => ethertype::IPV6,
                    _ => return None,
                };
                Some((Vec::new(), ether_type, data))
            }
            LinkLayer::Ipv4 => Some((Vec::new(), ethertype::IPV4, data)),
            LinkLayer::Ipv6 => Some((Vec::new(), ethertype::IPV6, data)),
        }
    }
}

/// Network-layer view of a packet.
#[derive(Debug, Clone, Copy)]
struct IpLayer {
    src: IpAddr,
    dst: IpAddr,
    protocol: u8,
}

/// The header fields primitives are evaluated against.
#[derive(Debug, Default)]
struct PacketView {
    vlan_ids: Vec<u16>,
    ether_type: Option<u16>,
    ip: Option<IpLayer>,
    ports: Option<(u16, u16)>,
}

impl PacketView {
    fn decode(link: LinkLayer, data: &[u8]) -> Self {
        let Some((vlan_ids, ether_type, payload)) = link.decode(data) else {
            return Self::default();
        };

        let mut view = PacketView {
            vlan_ids,
            ether_type: Some(ether_type),
            ..Default::default()
        };

        let transport = match ether_type {
            ethertype::IPV4 => decode_ipv4(payload),
            ethertype::IPV6 => decode_ipv6(payload),
            _ => None,
        };

        if let Some((ip, transport)) = transport {
            view.ip = Some(ip);
            view.ports = transport.and_then(|segment| decode_ports(ip.protocol, segment));
        }
        view
    }

    /// IP payload protocol, optionally requiring an IP version.
    fn has_ip_protocol(&self, version: Option<IpVersion>, number: u8) -> bool {
        self.ip.is_some_and(|ip| {
            ip.protocol == number && version.map_or(true, |v| v == IpVersion::of(&ip.src))
        })
    }

    /// Ports of a TCP or UDP segment, honouring an optional transport qualifier.
    fn ports_for(&self, transport: Option<Transport>) -> Option<(u16, u16)> {
        let protocol = self.ip?.protocol;
        let wanted = match transport {
            Some(transport) => protocol == transport.ip_number(),
            None => protocol == ip_proto::TCP || protocol == ip_proto::UDP,
        };
        if wanted {
            self.ports
        } else {
            None
        }
    }
}

/// Decode an IPv4 header; the transport slice is absent for non-first fragments.
fn decode_ipv4(data: &[u8]) -> Option<(IpLayer, Option<&[u8]>)> {
    let header = Ipv4HeaderSlice::from_slice(data).ok()?;
    let ip = IpLayer {
        src: IpAddr::V4(Ipv4Addr::from(header.source())),
        dst: IpAddr::V4(Ipv4Addr::from(header.destination())),
        protocol: header.protocol().0,
    };
    let transport = if header.fragments_offset().value() == 0 {
        Some(&data[header.slice().len()..])
    } else {
        None
    };
    Some((ip, transport))
}

/// Decode an IPv6 header and walk its extension headers.
fn decode_ipv6(data: &[u8]) -> Option<(IpLayer, Option<&[u8]>)> {
    let header = Ipv6HeaderSlice::from_slice(data).ok()?;
    let mut protocol = header.next_header().0;
    let mut payload = &data[header.slice().len()..];
    let mut transport_visible = true;

    for _ in 0..MAX_EXTENSION_HEADERS {
        let len = match protocol {
            next_header::HOP_BY_HOP | next_header::ROUTING | next_header::DESTINATION => {
                payload.get(1).map(|&len| (usize::from(len) + 1) * 8)
            }
            next_header::FRAGMENT => {
                if let Some(bytes) = payload.get(2..4) {
                    let offset = u16::from_be_bytes([bytes[0], bytes[1]]) >> 3;
                    transport_visible &= offset == 0;
                }
                Some(8)
            }
            next_header::AH => payload.get(1).map(|&len| (usize::from(len) + 2) * 4),
            _ => break,
        };
        match len {
            Some(len) if payload.len() >= len => {
                protocol = payload[0];
                payload = &payload[len..];
            }
            _ => {
                transport_visible = false;
                break;
            }
        }
    }

    let ip = IpLayer {
        src: IpAddr::V6(Ipv6Addr::from(header.source())),
        dst: IpAddr::V6(Ipv6Addr::from(header.destination())),
        protocol,
    };
    Some((ip, transport_visible.then_some(payload)))
}

fn decode_ports(protocol: u8, segment: &[u8]) -> Option<(u16, u16)> {
    match protocol {
        ip_proto::TCP => TcpHeaderSlice::from_slice(segment)
            .ok()
            .map(|tcp| (tcp.source_port(), tcp.destination_port())),
        ip_proto::UDP => UdpHeaderSlice::from_slice(segment)
            .ok()
            .map(|udp| (udp.source_port(), udp.destination_port())),
        _ => None,
    }
}

/// A filter expression compiled for one capture's link layer.
#[derive(Debug, Clone)]
pub struct PacketFilter {
    expression: String,
    expr: FilterExpr,
    link: LinkLayer,
}

impl PacketFilter {
    /// Compile `expression` for packets of the given link type.
    pub fn compile(expression: &str, link_type: u32) -> Result<Self, FilterError> {
        let expr = parse_filter(expression)?;
        let link = LinkLayer::from_link_type(link_type)
            .ok_or(FilterError::UnsupportedLinkType { link_type })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            expr,
            link,
        })
    }

    /// The expression text this filter was compiled from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The link layer this filter decodes.
    pub fn link_layer(&self) -> LinkLayer {
        self.link
    }

    /// Evaluate the filter against raw captured bytes.
    pub fn matches_bytes(&self, data: &[u8]) -> bool {
        let view = PacketView::decode(self.link, data);
        eval(&self.expr, &view)
    }
}

impl RecordFilter for PacketFilter {
    fn matches(&self, record: &PacketRecord) -> bool {
        self.matches_bytes(&record.data)
    }
}

fn eval(expr: &FilterExpr, view: &PacketView) -> bool {
    match expr {
        FilterExpr::Match(primitive) => eval_primitive(primitive, view),
        FilterExpr::Not(inner) => !eval(inner, view),
        FilterExpr::And(left, right) => eval(left, view) && eval(right, view),
        FilterExpr::Or(left, right) => eval(left, view) || eval(right, view),
    }
}

fn eval_primitive(primitive: &Primitive, view: &PacketView) -> bool {
    match primitive {
        Primitive::EtherType(ether_type) => view.ether_type == Some(*ether_type),
        Primitive::IpProto { version, number } => view.has_ip_protocol(*version, *number),
        Primitive::Host { direction, addr } => view
            .ip
            .is_some_and(|ip| direction.holds(ip.src, ip.dst, |candidate| candidate == *addr)),
        Primitive::Net { direction, network } => view.ip.is_some_and(|ip| {
            direction.holds(ip.src, ip.dst, |candidate| network.contains(&candidate))
        }),
        Primitive::Port {
            direction,
            transport,
            range,
        } => view
            .ports_for(*transport)
            .is_some_and(|(src, dst)| direction.holds(src, dst, |port| range.contains(&port))),
        Primitive::Vlan(None) => !view.vlan_ids.is_empty(),
        Primitive::Vlan(Some(id)) => view.vlan_ids.contains(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an Ethernet/IPv4/TCP packet.
    fn tcp_packet(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        let mut packet = Vec::new();

        // Ethernet header (14 bytes)
        packet.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]); // dst MAC
        packet.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]); // src MAC
        packet.extend_from_slice(&[0x08, 0x00]); // ethertype: IPv4

        // IPv4 header (20 bytes)
        packet.push(0x45); // Version 4, IHL 5
        packet.push(0x00); // DSCP + ECN
        packet.extend_from_slice(&[0x00, 0x28]); // Total length: 40
        packet.extend_from_slice(&[0x00, 0x01]); // Identification
        packet.extend_from_slice(&[0x40, 0x00]); // Don't fragment
        packet.push(0x40); // TTL: 64
        packet.push(0x06); // Protocol: TCP
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum
        packet.extend_from_slice(&src);
        packet.extend_from_slice(&dst);

        // TCP header (20 bytes)
        packet.extend_from_slice(&sport.to_be_bytes());
        packet.extend_from_slice(&dport.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // Seq: 1
        packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // Ack: 0
        packet.push(0x50); // Data offset: 5 (20 bytes)
        packet.push(0x02); // Flags: SYN
        packet.extend_from_slice(&[0xff, 0xff]); // Window: 65535
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum
        packet.extend_from_slice(&[0x00, 0x00]); // Urgent pointer

        packet
    }

    /// Build an Ethernet/IPv4/UDP packet.
    fn udp_packet(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]); // dst MAC
        packet.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]); // src MAC
        packet.extend_from_slice(&[0x08, 0x00]); // ethertype: IPv4

        packet.push(0x45);
        packet.push(0x00);
        packet.extend_from_slice(&[0x00, 0x1c]); // Total length: 28
        packet.extend_from_slice(&[0x12, 0x34]); // Identification
        packet.extend_from_slice(&[0x00, 0x00]); // No fragmentation
        packet.push(0x40); // TTL: 64
        packet.push(0x11); // Protocol: UDP
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum
        packet.extend_from_slice(&src);
        packet.extend_from_slice(&dst);

        packet.extend_from_slice(&sport.to_be_bytes());
        packet.extend_from_slice(&dport.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x08]); // Length: 8
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum

        packet
    }

    /// Build an Ethernet/IPv6/UDP packet behind a hop-by-hop header.
    fn udp6_packet(sport: u16, dport: u16) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.extend_from_slice(&[0x33, 0x33, 0x00, 0x00, 0x00, 0x01]); // dst MAC
        packet.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]); // src MAC
        packet.extend_from_slice(&[0x86, 0xdd]); // ethertype: IPv6

        packet.extend_from_slice(&[0x60, 0x00, 0x00, 0x00]); // Version 6
        packet.extend_from_slice(&[0x00, 0x10]); // Payload length: 16
        packet.push(0x00); // Next header: hop-by-hop
        packet.push(0x40); // Hop limit
        packet.extend_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets());
        packet.extend_from_slice(&Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2).octets());

        // Hop-by-hop (8 bytes): next header UDP, PadN
        packet.extend_from_slice(&[0x11, 0x00, 0x01, 0x04, 0x00, 0x00, 0x00, 0x00]);

        packet.extend_from_slice(&sport.to_be_bytes());
        packet.extend_from_slice(&dport.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x08, 0x00, 0x00]);

        packet
    }

    /// Insert an 802.1Q tag after the MAC addresses.
    fn vlan_tagged(mut packet: Vec<u8>, vlan_id: u16) -> Vec<u8> {
        let tag = [0x81, 0x00, (vlan_id >> 8) as u8, vlan_id as u8];
        packet.splice(12..12, tag);
        packet
    }

    fn filter(expr: &str) -> PacketFilter {
        PacketFilter::compile(expr, 1).unwrap()
    }

    #[test]
    fn test_protocol_match() {
        let tcp = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 12345, 80);
        let udp = udp_packet([10, 0, 0, 1], [8, 8, 8, 8], 49152, 53);

        assert!(filter("tcp").matches_bytes(&tcp));
        assert!(!filter("tcp").matches_bytes(&udp));
        assert!(filter("udp").matches_bytes(&udp));
        assert!(filter("ip").matches_bytes(&tcp));
        assert!(!filter("ip6").matches_bytes(&tcp));
        assert!(!filter("icmp").matches_bytes(&tcp));
        assert!(filter("proto 17").matches_bytes(&udp));
    }

    #[test]
    fn test_host_direction() {
        let tcp = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 12345, 80);

        assert!(filter("host 10.0.0.2").matches_bytes(&tcp));
        assert!(filter("src host 10.0.0.1").matches_bytes(&tcp));
        assert!(!filter("src host 10.0.0.2").matches_bytes(&tcp));
        assert!(filter("dst host 10.0.0.2").matches_bytes(&tcp));
        assert!(!filter("host ::1").matches_bytes(&tcp));
    }

    #[test]
    fn test_port_and_protocol_qualifier() {
        let tcp = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 12345, 80);
        let udp = udp_packet([10, 0, 0, 1], [8, 8, 8, 8], 49152, 53);

        assert!(filter("port 80").matches_bytes(&tcp));
        assert!(filter("tcp port 80").matches_bytes(&tcp));
        assert!(!filter("udp port 80").matches_bytes(&tcp));
        assert!(filter("dst port 53").matches_bytes(&udp));
        assert!(!filter("src port 53").matches_bytes(&udp));
        assert!(filter("portrange 50-60").matches_bytes(&udp));
        assert!(!filter("tcp portrange 50-60").matches_bytes(&udp));
        assert!(filter("tcp dst port 80").matches_bytes(&tcp));
        assert!(!filter("tcp src port 80").matches_bytes(&tcp));
    }

    #[test]
    fn test_icmp_keywords_are_version_specific() {
        let mut icmp = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 0, 0);
        icmp[23] = 1;
        assert!(filter("icmp").matches_bytes(&icmp));
        assert!(filter("proto 1").matches_bytes(&icmp));
        assert!(!filter("icmp6").matches_bytes(&icmp));
        assert!(!filter("tcp").matches_bytes(&icmp));

        // Next header of the hop-by-hop option follows the 40-byte IPv6 header
        let mut icmp6 = udp6_packet(0, 0);
        icmp6[54] = 58;
        assert!(filter("icmp6").matches_bytes(&icmp6));
        assert!(!filter("icmp").matches_bytes(&icmp6));
    }

    #[test]
    fn test_net_match() {
        let tcp = tcp_packet([192, 168, 1, 100], [172, 16, 0, 9], 1, 2);
        assert!(filter("net 192.168.0.0/16").matches_bytes(&tcp));
        assert!(filter("dst net 172.16.0.0/12").matches_bytes(&tcp));
        assert!(!filter("src net 172.16.0.0/12").matches_bytes(&tcp));
    }

    #[test]
    fn test_boolean_combinations() {
        let tcp = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 22, 5000);
        assert!(filter("host 10.0.0.1 and port 22").matches_bytes(&tcp));
        assert!(!filter("host 10.0.0.1 and not port 22").matches_bytes(&tcp));
        assert!(filter("udp or (tcp and src port 22)").matches_bytes(&tcp));
    }

    #[test]
    fn test_vlan_tagged_frames() {
        let tagged = vlan_tagged(tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 443), 100);
        let untagged = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 443);

        assert!(filter("vlan").matches_bytes(&tagged));
        assert!(filter("vlan 100 and tcp port 443").matches_bytes(&tagged));
        assert!(!filter("vlan 200").matches_bytes(&tagged));
        assert!(!filter("vlan").matches_bytes(&untagged));

        // Tags are skipped without a leading `vlan`
        assert!(filter("tcp port 443").matches_bytes(&tagged));
        assert!(filter("host 10.0.0.2 and not vlan 200").matches_bytes(&tagged));
    }

    #[test]
    fn test_ipv6_extension_headers() {
        let udp6 = udp6_packet(5353, 5353);
        assert!(filter("ip6").matches_bytes(&udp6));
        assert!(filter("udp port 5353").matches_bytes(&udp6));
        assert!(filter("src host 2001:db8::1").matches_bytes(&udp6));
        assert!(filter("dst net fe80::/10").matches_bytes(&udp6));
        assert!(!filter("ip").matches_bytes(&udp6));
    }

    #[test]
    fn test_arp() {
        let mut arp = vec![0xff; 6];
        arp.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        arp.extend_from_slice(&[0x08, 0x06]);
        arp.extend_from_slice(&[0u8; 28]);

        assert!(filter("arp").matches_bytes(&arp));
        assert!(!filter("ip").matches_bytes(&arp));
        assert!(!filter("host 10.0.0.1").matches_bytes(&arp));
    }

    #[test]
    fn test_truncated_packet() {
        let mut tcp = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 80);
        tcp.truncate(40); // Cut into the TCP header
        assert!(filter("tcp").matches_bytes(&tcp));
        assert!(!filter("port 80").matches_bytes(&tcp));
        assert!(!filter("tcp").matches_bytes(&tcp[..10]));
    }

    #[test]
    fn test_other_link_layers() {
        let eth = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 80);
        let ip = &eth[14..];

        let raw = PacketFilter::compile("tcp port 80", 101).unwrap();
        assert_eq!(raw.link_layer(), LinkLayer::RawIp);
        assert!(raw.matches_bytes(ip));

        let mut sll = vec![0u8; 14];
        sll.extend_from_slice(&[0x08, 0x00]);
        sll.extend_from_slice(ip);
        assert!(PacketFilter::compile("host 10.0.0.2", 113)
            .unwrap()
            .matches_bytes(&sll));

        let mut null = 2u32.to_le_bytes().to_vec();
        null.extend_from_slice(ip);
        assert!(PacketFilter::compile("tcp", 0).unwrap().matches_bytes(&null));
    }

    #[test]
    fn test_unsupported_link_type() {
        let err = PacketFilter::compile("tcp", 127).unwrap_err();
        assert!(matches!(
            err,
            FilterError::UnsupportedLinkType { link_type: 127 }
        ));
    }

    #[test]
    fn test_record_filter_impl() {
        use crate::pcap::Timestamp;

        let packet = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 80);
        let record = PacketRecord::new(Timestamp::ZERO, packet.len() as u32, packet);
        let f = filter("  tcp port 80 ");
        assert_eq!(f.expression(), "tcp port 80");
        assert!(f.matches(&record));
    }
}
