//! IPv4 CIDR arithmetic (`spec.md` §4.1).
//!
//! The compiler never touches dotted-quad strings directly; every
//! containment test and rendering decision goes through this module.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::FwError;

/// A canonicalized IPv4 network: `network` is always the network address for
/// `prefix`, i.e. `network_address(network, prefix) == network`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    /// Canonicalizes `addr` against `prefix`, discarding any host bits.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, FwError> {
        if prefix > 32 {
            return Err(FwError::bad_data(
                addr.to_string(),
                format!("prefix length {prefix} out of range 0..=32"),
            ));
        }
        Ok(Cidr {
            network: network_address(addr, prefix),
            prefix,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// `true` if `self`'s network address, masked by `self`'s own prefix,
    /// falls inside `self` — always true for a canonicalized value; exposed
    /// mainly so tests can assert the canonicalization invariant directly.
    pub fn is_canonical(&self) -> bool {
        network_address(self.network, self.prefix) == self.network
    }

    /// Network⊂Network containment (`spec.md` §3): `other`'s address masked
    /// by `self`'s prefix equals `self`'s address, and `other`'s prefix is
    /// at least as specific as `self`'s.
    pub fn contains_network(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && network_address(other.network, self.prefix) == self.network
    }

    /// Host⊂Network containment: `addr` masked by `self`'s prefix equals
    /// `self`'s network address.
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        network_address(addr, self.prefix) == self.network
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = FwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = parse_cidr(s)?;
        Cidr::new(addr, prefix)
    }
}

/// Masks `addr` down to its network address under `prefix` bits.
pub fn network_address(addr: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask = prefix_mask(prefix);
    Ipv4Addr::from(u32::from(addr) & mask)
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

/// Parses `"a.b.c.d/n"` or a bare `"a.b.c.d"` (implying a /32 host route).
pub fn parse_cidr(s: &str) -> Result<(Ipv4Addr, u8), FwError> {
    let (addr_part, prefix_part) = match s.split_once('/') {
        Some((a, p)) => (a, p),
        None => (s, "32"),
    };

    let addr = addr_part
        .parse::<Ipv4Addr>()
        .map_err(|e| FwError::bad_data(s, format!("invalid IPv4 address: {e}")))?;
    let prefix: u8 = prefix_part
        .parse()
        .map_err(|_| FwError::bad_data(s, "invalid prefix length"))?;
    if prefix > 32 {
        return Err(FwError::bad_data(s, "prefix length out of range 0..=32"));
    }

    Ok((addr, prefix))
}

/// Host⊂Host containment (`spec.md` §3): identical addresses.
pub fn same_host(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_on_construction() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 5), 24).unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert!(cidr.is_canonical());
    }

    #[test]
    fn prefix_zero_is_unconstrained() {
        let any = Cidr::new(Ipv4Addr::new(0, 0, 0, 0), 0).unwrap();
        assert!(any.contains_addr(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn network_contains_network_requires_more_specific_prefix() {
        let parent = Cidr::from_str("10.0.0.0/16").unwrap();
        let child = Cidr::from_str("10.0.1.0/24").unwrap();
        let sibling = Cidr::from_str("10.1.0.0/24").unwrap();

        assert!(parent.contains_network(&child));
        assert!(!parent.contains_network(&sibling));
        assert!(!child.contains_network(&parent));
    }

    #[test]
    fn rejects_out_of_range_prefix() {
        assert!(parse_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn bare_address_is_host_route() {
        let (addr, prefix) = parse_cidr("1.2.3.4").unwrap();
        assert_eq!(addr, Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(prefix, 32);
    }
}
