//! IPv4 subnet arithmetic for bridge networks.
//!
//! A cluster subnet is split into three regions:
//!
//! ```text
//! 10.10.0.0/24
//! ├── 10.10.0.0   - 10.10.0.31    allocation range (/27), handed out by the engine
//! ├── 10.10.0.32  - 10.10.0.253   static peers, top is the last usable address
//! └── 10.10.0.254                 gateway anchor for the WAN emulation node
//! ```

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use netfab_common::{NetfabError, NetfabResult};

/// Longest subnet prefix accepted.
///
/// A /29 still leaves room for an allocation range, a static address and
/// the gateway anchor. Longer prefixes are rejected outright.
pub const MAX_SUBNET_PREFIX: u8 = 29;

/// Default prefix length of the dynamic allocation range.
pub const DEFAULT_ALLOCATION_PREFIX: u8 = 27;

/// Parse an IPv4 CIDR, truncating host bits like `10.10.0.7/24` to the
/// network address.
///
/// # Errors
///
/// Returns [`NetfabError::Validation`] on anything that is not an IPv4 CIDR.
pub fn parse_subnet(cidr: &str) -> NetfabResult<Ipv4Net> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|e| NetfabError::validation(format!("invalid IPv4 CIDR '{cidr}': {e}")))
}

fn ensure_room(net: &Ipv4Net) -> NetfabResult<()> {
    if net.prefix_len() > MAX_SUBNET_PREFIX {
        return Err(NetfabError::validation(format!(
            "subnet {net} is too small, prefixes longer than /{MAX_SUBNET_PREFIX} are not supported"
        )));
    }
    Ok(())
}

/// Address one below the broadcast address of `net`.
///
/// # Errors
///
/// Returns [`NetfabError::Validation`] if `net` is longer than
/// [`MAX_SUBNET_PREFIX`].
pub fn gateway_in(net: &Ipv4Net) -> NetfabResult<Ipv4Addr> {
    ensure_room(net)?;
    Ok(Ipv4Addr::from(u32::from(net.broadcast()) - 1))
}

/// Highest address assignable below the gateway anchor of `net`.
///
/// # Errors
///
/// Returns [`NetfabError::Validation`] if `net` is longer than
/// [`MAX_SUBNET_PREFIX`].
pub fn last_usable_in(net: &Ipv4Net) -> NetfabResult<Ipv4Addr> {
    let gateway = gateway_in(net)?;
    Ok(Ipv4Addr::from(u32::from(gateway) - 1))
}

/// Gateway anchor address for a CIDR string.
///
/// `gateway_address("10.10.0.0/24")` is `10.10.0.254`.
///
/// # Errors
///
/// Fails on malformed or too-small subnets.
pub fn gateway_address(cidr: &str) -> NetfabResult<Ipv4Addr> {
    gateway_in(&parse_subnet(cidr)?)
}

/// Last usable address for a CIDR string.
///
/// `last_usable_address("10.10.0.0/24")` is `10.10.0.253`.
///
/// # Errors
///
/// Fails on malformed or too-small subnets.
pub fn last_usable_address(cidr: &str) -> NetfabResult<Ipv4Addr> {
    last_usable_in(&parse_subnet(cidr)?)
}

/// Restricted allocation block anchored at the base of `net`.
///
/// The result is `/prefix` unless that would cover the whole subnet, in
/// which case it is half of it. It is always a strict subset of `net`.
///
/// # Errors
///
/// Returns [`NetfabError::Validation`] if `net` is too small or `prefix`
/// is not a valid IPv4 prefix length.
pub fn allocation_range(net: &Ipv4Net, prefix: u8) -> NetfabResult<Ipv4Net> {
    ensure_room(net)?;
    let prefix = prefix.max(net.prefix_len() + 1);
    Ipv4Net::new(net.network(), prefix)
        .map_err(|e| NetfabError::validation(format!("invalid allocation prefix /{prefix}: {e}")))
}
