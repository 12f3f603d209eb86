//! IP address range parsing and matching.
//!
//! Rule patterns and whitelists accept three textual forms: a bare address
//! (exact match), CIDR notation (`192.168.0.0/24`), and an inclusive
//! dash-delimited range (`10.0.0.1 - 10.0.0.10`). Client addresses may carry
//! a port suffix (common behind load balancers); [`parse_ip`] strips it
//! before matching.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::{Result, ThrottleError};

/// Parse an IP address, stripping a trailing `:port` if one is present.
///
/// The port is stripped only when exactly one `:` appears (IPv4 with port),
/// or when IPv6 bracket notation is used (`[::1]` or `[::1]:8080`). A raw
/// IPv6 address with its multiple colons is parsed as-is.
pub fn parse_ip(text: &str) -> Result<IpAddr> {
    let trimmed = text.trim();
    strip_port(trimmed)
        .parse()
        .map_err(|_| ThrottleError::InvalidAddress(trimmed.to_string()))
}

fn strip_port(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix('[') {
        // bracket notation, with or without a port suffix
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
        return text;
    }

    if text.matches(':').count() == 1 {
        // exactly one colon outside brackets: address:port
        match text.rfind(':') {
            Some(pos) => &text[..pos],
            None => text,
        }
    } else {
        text
    }
}

/// Classify an address as private or link-local.
///
/// IPv4: 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16, and the link-local
/// 169.254.0.0/16 block. IPv6: unique-local addresses (first octet 0xFD).
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || (octets[0] == 169 && octets[1] == 254)
        }
        IpAddr::V6(v6) => v6.octets()[0] == 0xfd,
    }
}

/// A parsed IP range pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRange {
    /// A single address, matched exactly
    Exact(IpAddr),
    /// A CIDR block
    Cidr(IpNet),
    /// An inclusive low-high span within one address family
    Span(IpAddr, IpAddr),
}

impl IpRange {
    /// Test whether this range contains the given address.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            IpRange::Exact(addr) => *addr == ip,
            IpRange::Cidr(net) => net.contains(&ip),
            IpRange::Span(low, high) => match (numeric(*low, ip), numeric(*high, ip)) {
                (Some((lo, value)), Some((hi, _))) => lo <= value && value <= hi,
                _ => false,
            },
        }
    }
}

/// Map a bound and a candidate to comparable integers, or `None` when the
/// address families differ.
fn numeric(bound: IpAddr, candidate: IpAddr) -> Option<(u128, u128)> {
    match (bound, candidate) {
        (IpAddr::V4(b), IpAddr::V4(c)) => Some((u32::from(b) as u128, u32::from(c) as u128)),
        (IpAddr::V6(b), IpAddr::V6(c)) => Some((u128::from(b), u128::from(c))),
        _ => None,
    }
}

impl FromStr for IpRange {
    type Err = ThrottleError;

    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();

        // dash-ranges only occur between addresses, never inside one
        if let Some((low, high)) = spec.split_once('-') {
            let low = parse_ip(low)?;
            let high = parse_ip(high)?;
            match numeric(low, high) {
                Some((lo, hi)) if lo <= hi => return Ok(IpRange::Span(low, high)),
                _ => return Err(ThrottleError::InvalidAddress(spec.to_string())),
            }
        }

        if spec.contains('/') {
            let net: IpNet = spec
                .parse()
                .map_err(|_| ThrottleError::InvalidAddress(spec.to_string()))?;
            return Ok(IpRange::Cidr(net));
        }

        Ok(IpRange::Exact(parse_ip(spec)?))
    }
}

/// Find the first range spec containing `ip`, in input order.
///
/// Unparseable specs are skipped so one bad entry never blocks evaluation of
/// the rest of the batch. Returns the matching spec text so callers can
/// report which rule matched.
pub fn first_match<'a, I>(specs: I, ip: IpAddr) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    specs.into_iter().find(|spec| match spec.parse::<IpRange>() {
        Ok(range) => range.contains(ip),
        Err(_) => false,
    })
}

/// Test whether any of the range specs contains `ip`.
pub fn contains_ip<'a, I>(specs: I, ip: IpAddr) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    first_match(specs, ip).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_plain_ipv4() {
        assert_eq!(parse_ip("192.168.0.1").unwrap(), ip("192.168.0.1"));
        assert_eq!(parse_ip("  10.0.0.1  ").unwrap(), ip("10.0.0.1"));
    }

    #[test]
    fn test_parse_ipv4_with_port() {
        assert_eq!(parse_ip("192.168.0.1:8080").unwrap(), ip("192.168.0.1"));
    }

    #[test]
    fn test_parse_plain_ipv6() {
        assert_eq!(parse_ip("fe80::1").unwrap(), ip("fe80::1"));
        assert_eq!(parse_ip("::1").unwrap(), ip("::1"));
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        assert_eq!(parse_ip("[::1]").unwrap(), ip("::1"));
        assert_eq!(parse_ip("[fe80::1]:8080").unwrap(), ip("fe80::1"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_ip("not-an-ip").is_err());
        assert!(parse_ip("256.1.1.1").is_err());
        assert!(parse_ip("").is_err());
    }

    #[test]
    fn test_is_private_ipv4() {
        assert!(is_private(ip("10.1.2.3")));
        assert!(is_private(ip("172.16.0.1")));
        assert!(is_private(ip("172.31.255.255")));
        assert!(is_private(ip("192.168.1.1")));
        assert!(is_private(ip("169.254.0.5")));

        assert!(!is_private(ip("172.32.0.1")));
        assert!(!is_private(ip("8.8.8.8")));
        assert!(!is_private(ip("203.0.113.9")));
    }

    #[test]
    fn test_is_private_ipv6() {
        assert!(is_private(IpAddr::V6(Ipv6Addr::new(
            0xfd00, 0, 0, 0, 0, 0, 0, 1
        ))));
        assert!(!is_private(ip("2001:db8::1")));
    }

    #[test]
    fn test_cidr_range() {
        let range: IpRange = "192.168.0.0/24".parse().unwrap();
        assert!(range.contains(ip("192.168.0.17")));
        assert!(!range.contains(ip("192.168.1.1")));
    }

    #[test]
    fn test_dash_range() {
        let range: IpRange = "10.0.0.1 - 10.0.0.10".parse().unwrap();
        assert!(range.contains(ip("10.0.0.5")));
        assert!(range.contains(ip("10.0.0.1")));
        assert!(range.contains(ip("10.0.0.10")));
        assert!(!range.contains(ip("10.0.0.11")));
    }

    #[test]
    fn test_exact_range() {
        let range: IpRange = "203.0.113.9".parse().unwrap();
        assert!(range.contains(ip("203.0.113.9")));
        assert!(!range.contains(ip("203.0.113.10")));
    }

    #[test]
    fn test_inverted_dash_range_rejected() {
        assert!("10.0.0.10 - 10.0.0.1".parse::<IpRange>().is_err());
    }

    #[test]
    fn test_mixed_family_never_matches() {
        let range: IpRange = "192.168.0.0/24".parse().unwrap();
        assert!(!range.contains(ip("::1")));

        assert!("10.0.0.1 - fe80::1".parse::<IpRange>().is_err());
    }

    #[test]
    fn test_first_match_returns_matching_spec() {
        let specs = ["10.0.0.0/8", "192.168.0.0/24", "192.168.0.17"];
        let matched = first_match(specs.iter().copied(), ip("192.168.0.17"));
        assert_eq!(matched, Some("192.168.0.0/24"));
    }

    #[test]
    fn test_first_match_skips_bad_entries() {
        let specs = ["garbage", "300.0.0.0/8", "192.168.0.0/16"];
        let matched = first_match(specs.iter().copied(), ip("192.168.5.5"));
        assert_eq!(matched, Some("192.168.0.0/16"));
    }

    #[test]
    fn test_contains_ip() {
        let specs = vec!["127.0.0.1".to_string(), "192.168.0.0/24".to_string()];
        assert!(contains_ip(
            specs.iter().map(String::as_str),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        ));
        assert!(!contains_ip(specs.iter().map(String::as_str), ip("8.8.8.8")));
    }
}
