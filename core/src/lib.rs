//! Core utilities and shared types for the netsweep engine.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::Serialize;

pub mod error;
pub mod ports;

pub use error::{LookupError, PrefixParseError, SweepError};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Lowest and highest host octet probed in a sweep.
pub const FIRST_HOST: u8 = 1;
pub const LAST_HOST: u8 = 254;

/// The first three octets shared by every candidate in one sweep.
///
/// Sweeps always assume a /24 layout where only the final octet varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubnetPrefix([u8; 3]);

impl SubnetPrefix {
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        SubnetPrefix([a, b, c])
    }

    pub fn octets(&self) -> [u8; 3] {
        self.0
    }

    /// Address of `host` inside this prefix.
    pub fn host(&self, host: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, host)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        SubnetPrefix::from(addr) == *self
    }

    /// Lazily yields `prefix.1` through `prefix.254`.
    pub fn candidates(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (FIRST_HOST..=LAST_HOST).map(move |h| self.host(h))
    }
}

impl From<Ipv4Addr> for SubnetPrefix {
    fn from(addr: Ipv4Addr) -> Self {
        let [a, b, c, _] = addr.octets();
        SubnetPrefix([a, b, c])
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{}.{}.{}.0/24", a, b, c)
    }
}

impl Serialize for SubnetPrefix {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts `a.b.c.0/24`, any address inside the /24 (`a.b.c.d`), or the bare
/// three-octet form `a.b.c`.
impl FromStr for SubnetPrefix {
    type Err = PrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('/') {
            let net: Ipv4Net = s.parse().map_err(|_| PrefixParseError::Invalid(s.to_string()))?;
            if net.prefix_len() != 24 {
                return Err(PrefixParseError::UnsupportedLength(net.prefix_len()));
            }
            return Ok(SubnetPrefix::from(net.network()));
        }
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(SubnetPrefix::from(addr));
        }
        format!("{}.0", s)
            .parse::<Ipv4Addr>()
            .map(SubnetPrefix::from)
            .map_err(|_| PrefixParseError::Invalid(s.to_string()))
    }
}
