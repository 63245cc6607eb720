//! Filter expression parser built from nom combinators.
//!
//! ```text
//! expr       = and_expr (("or" | "||") and_expr)*
//! and_expr   = unary (("and" | "&&") unary)*
//! unary      = ("not" | "!") unary | "(" expr ")" | primitive
//! primitive  = "vlan" [id] | "proto" number | endpoint | protocol
//! endpoint   = qualifiers ("port" number | "portrange" number "-" number)
//!            | [direction] ("host" address | "net" address "/" length)
//! qualifiers = [direction] [transport] | transport direction
//! ```
//!
//! Keywords are case-insensitive and must end at a word boundary, so `tcpx`
//! is rejected rather than read as `tcp` followed by garbage.

use std::net::IpAddr;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{all_consuming, fail, map, map_opt, map_res, not, opt, value, verify},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
    IResult, Parser,
};

use super::ast::{
    ethertype, ip_proto, Direction, FilterExpr, IpVersion, Network, Primitive, Transport,
};
use super::error::FilterError;

/// Largest 802.1Q VLAN identifier.
const MAX_VLAN_ID: u16 = 4095;

type ParseError<'a> = nom::error::Error<&'a str>;

/// Parse a complete filter expression.
///
/// A blank expression is an error here; callers that treat it as "no
/// filter" check before compiling.
pub fn parse_filter(input: &str) -> Result<FilterExpr, FilterError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(FilterError::EmptyFilter);
    }

    all_consuming(expr)(text)
        .map(|(_, expr)| expr)
        .map_err(|e| FilterError::parse_error(text, e.to_string()))
}

fn expr(input: &str) -> IResult<&str, FilterExpr> {
    chain(and_expr, operator("or", "||"), |a, b| a | b)(input)
}

fn and_expr(input: &str) -> IResult<&str, FilterExpr> {
    chain(unary, operator("and", "&&"), |a, b| a & b)(input)
}

/// Left-associative run of `operand`s separated by `op`.
///
/// Once an operator has been read the following operand is mandatory.
fn chain<'a, P, O>(
    mut operand: P,
    mut op: O,
    join: fn(FilterExpr, FilterExpr) -> FilterExpr,
) -> impl FnMut(&'a str) -> IResult<&'a str, FilterExpr>
where
    P: Parser<&'a str, FilterExpr, ParseError<'a>>,
    O: Parser<&'a str, &'a str, ParseError<'a>>,
{
    move |input| {
        let (mut input, mut acc) = operand.parse(input)?;
        while let Ok((after_op, _)) = op.parse(input) {
            let (rest, rhs) = operand.parse(after_op)?;
            acc = join(acc, rhs);
            input = rest;
        }
        Ok((input, acc))
    }
}

fn unary(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(
            preceded(pair(alt((keyword("not"), tag("!"))), multispace0), unary),
            |inner: FilterExpr| !inner,
        ),
        delimited(
            pair(char('('), multispace0),
            expr,
            pair(multispace0, char(')')),
        ),
        map(primitive, FilterExpr::from),
    ))(input)
}

/// A binary operator written as a word or a symbol, with optional padding.
fn operator<'a>(
    word: &'static str,
    symbol: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(multispace0, alt((keyword(word), tag(symbol))), multispace0)
}

/// A case-insensitive word not directly followed by a letter or digit.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag_no_case(word),
        not(satisfy(|c: char| c.is_ascii_alphanumeric())),
    )
}

fn primitive(input: &str) -> IResult<&str, Primitive> {
    alt((vlan, proto_number, endpoint, protocol))(input)
}

/// `vlan` or `vlan ID`.
fn vlan(input: &str) -> IResult<&str, Primitive> {
    let (input, _) = keyword("vlan")(input)?;
    let (input, id) = opt(preceded(
        multispace1,
        verify(number::<u16>, |id: &u16| *id <= MAX_VLAN_ID),
    ))(input)?;
    Ok((input, Primitive::Vlan(id)))
}

/// `proto N`.
fn proto_number(input: &str) -> IResult<&str, Primitive> {
    map(
        preceded(pair(keyword("proto"), multispace1), number::<u8>),
        |number| Primitive::IpProto {
            version: None,
            number,
        },
    )(input)
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Host,
    Net,
    Port,
    PortRange,
}

/// Host, network and port primitives with their qualifiers.
fn endpoint(input: &str) -> IResult<&str, Primitive> {
    let (input, (direction, transport)) = qualifiers(input)?;
    let (input, kind) = terminated(
        alt((
            value(Endpoint::Host, keyword("host")),
            value(Endpoint::Net, keyword("net")),
            value(Endpoint::Port, keyword("port")),
            value(Endpoint::PortRange, keyword("portrange")),
        )),
        multispace1,
    )(input)?;

    match (kind, transport) {
        (Endpoint::Port, _) => map(number::<u16>, |port| Primitive::Port {
            direction,
            transport,
            range: port..=port,
        })(input),
        (Endpoint::PortRange, _) => map(
            separated_pair(number::<u16>, char('-'), number::<u16>),
            |(a, b)| Primitive::Port {
                direction,
                transport,
                range: a.min(b)..=a.max(b),
            },
        )(input),
        (Endpoint::Host, None) => {
            map(address, |addr| Primitive::Host { direction, addr })(input)
        }
        (Endpoint::Net, None) => {
            map(network, |network| Primitive::Net { direction, network })(input)
        }
        // tcp/udp only qualify ports
        (Endpoint::Host | Endpoint::Net, Some(_)) => fail(input),
    }
}

/// Direction and transport qualifiers, in either order.
fn qualifiers(input: &str) -> IResult<&str, (Direction, Option<Transport>)> {
    alt((
        map(
            pair(terminated(transport, multispace1), opt(direction_word)),
            |(t, d)| (d.unwrap_or_default(), Some(t)),
        ),
        map(
            pair(opt(direction_word), opt(terminated(transport, multispace1))),
            |(d, t)| (d.unwrap_or_default(), t),
        ),
    ))(input)
}

fn direction_word(input: &str) -> IResult<&str, Direction> {
    terminated(direction, multispace1)(input)
}

fn direction(input: &str) -> IResult<&str, Direction> {
    alt((
        value(Direction::Src, keyword("src")),
        value(Direction::Dst, keyword("dst")),
    ))(input)
}

fn transport(input: &str) -> IResult<&str, Transport> {
    alt((
        value(Transport::Tcp, keyword("tcp")),
        value(Transport::Udp, keyword("udp")),
    ))(input)
}

/// Bare protocol keywords.
fn protocol(input: &str) -> IResult<&str, Primitive> {
    let ip = |number, version| Primitive::IpProto { version, number };

    alt((
        value(ip(ip_proto::TCP, None), keyword("tcp")),
        value(ip(ip_proto::UDP, None), keyword("udp")),
        value(ip(ip_proto::ICMP, Some(IpVersion::V4)), keyword("icmp")),
        value(ip(ip_proto::ICMPV6, Some(IpVersion::V6)), keyword("icmp6")),
        value(Primitive::EtherType(ethertype::IPV4), keyword("ip")),
        value(Primitive::EtherType(ethertype::IPV6), keyword("ip6")),
        value(Primitive::EtherType(ethertype::ARP), keyword("arp")),
    ))(input)
}

/// An IPv4 or IPv6 literal.
fn address(input: &str) -> IResult<&str, IpAddr> {
    map_res(
        take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.'),
        |text: &str| text.parse::<IpAddr>(),
    )(input)
}

/// `ADDR/LEN` with the prefix no longer than the address.
fn network(input: &str) -> IResult<&str, Network> {
    map_opt(
        separated_pair(address, char('/'), number::<u8>),
        |(addr, prefix_len)| Network::new(addr, prefix_len),
    )(input)
}

/// A decimal number that fits in `T`.
fn number<T: FromStr>(input: &str) -> IResult<&str, T> {
    map_res(digit1, |digits: &str| digits.parse::<T>())(input)
}
