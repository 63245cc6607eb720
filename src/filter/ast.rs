//! Filter expression tree.
//!
//! Protocol keywords are resolved to the numbers the matcher compares
//! against while parsing, so evaluation never consults a keyword table.

use std::fmt;
use std::net::IpAddr;
use std::ops::{BitAnd, BitOr, Not, RangeInclusive};

/// EtherType values.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const VLAN: u16 = 0x8100;
    pub const IPV6: u16 = 0x86dd;
    pub const QINQ: u16 = 0x88a8;
    pub const QINQ_LEGACY: u16 = 0x9100;
}

/// IP protocol numbers.
pub mod ip_proto {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ICMPV6: u8 = 58;
}

/// Which end of a packet a `host`, `net` or `port` primitive inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Src,
    Dst,
    /// No qualifier: either end may match
    #[default]
    Either,
}

impl Direction {
    /// Whether `pred` holds for the selected end of a (src, dst) pair.
    pub fn holds<T: Copy>(self, src: T, dst: T, pred: impl Fn(T) -> bool) -> bool {
        match self {
            Direction::Src => pred(src),
            Direction::Dst => pred(dst),
            Direction::Either => pred(src) || pred(dst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

/// Transport qualifier of a port primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn ip_number(self) -> u8 {
        match self {
            Transport::Tcp => ip_proto::TCP,
            Transport::Udp => ip_proto::UDP,
        }
    }
}

/// An address block such as `10.0.0.0/8` or `fe80::/10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    addr: IpAddr,
    prefix_len: u8,
}

impl Network {
    /// Returns `None` when the prefix is longer than the address.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Option<Self> {
        let (_, width) = address_bits(&addr);
        (u32::from(prefix_len) <= width).then_some(Self { addr, prefix_len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` shares this network's prefix. Families never mix.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        if IpVersion::of(&self.addr) != IpVersion::of(addr) {
            return false;
        }
        let (network, width) = address_bits(&self.addr);
        let (candidate, _) = address_bits(addr);
        let host_bits = width - u32::from(self.prefix_len);
        // A /0 shifts every bit out
        (network ^ candidate).checked_shr(host_bits).unwrap_or(0) == 0
    }
}

/// An address as an integer plus its width in bits.
fn address_bits(addr: &IpAddr) -> (u128, u32) {
    match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(*v4)), 32),
        IpAddr::V6(v6) => (u128::from(*v6), 128),
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// A single test against one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    /// Network protocol by EtherType: `ip`, `ip6`, `arp`
    EtherType(u16),

    /// IP payload protocol: `tcp`, `icmp6`, `proto 47`
    IpProto {
        /// Set for keywords tied to one IP version (`icmp`, `icmp6`)
        version: Option<IpVersion>,
        number: u8,
    },

    /// `[src|dst] host ADDR`
    Host { direction: Direction, addr: IpAddr },

    /// `[src|dst] net ADDR/LEN`
    Net {
        direction: Direction,
        network: Network,
    },

    /// `[src|dst] [tcp|udp] port N` or `portrange A-B`; a single port is a
    /// one-element range
    Port {
        direction: Direction,
        transport: Option<Transport>,
        range: RangeInclusive<u16>,
    },

    /// 802.1Q/802.1ad tagged frame, optionally carrying a given VLAN id
    Vlan(Option<u16>),
}

/// Boolean combination of primitives.
///
/// Built with the `!`, `&` and `|` operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Match(Primitive),
    Not(Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl From<Primitive> for FilterExpr {
    fn from(primitive: Primitive) -> Self {
        FilterExpr::Match(primitive)
    }
}

impl Not for FilterExpr {
    type Output = FilterExpr;

    fn not(self) -> FilterExpr {
        FilterExpr::Not(Box::new(self))
    }
}

impl BitAnd for FilterExpr {
    type Output = FilterExpr;

    fn bitand(self, rhs: FilterExpr) -> FilterExpr {
        FilterExpr::And(Box::new(self), Box::new(rhs))
    }
}

impl BitOr for FilterExpr {
    type Output = FilterExpr;

    fn bitor(self, rhs: FilterExpr) -> FilterExpr {
        FilterExpr::Or(Box::new(self), Box::new(rhs))
    }
}
