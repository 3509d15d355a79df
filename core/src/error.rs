//! Error taxonomy shared by the sweep and mapping crates.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors that end a sweep. Per-candidate probe failures never show up here.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("pool size must be between 1 and {max}, got {requested}")]
    InvalidPoolSize { requested: usize, max: usize },
    #[error("failed to spawn sweep worker: {0}")]
    WorkerSpawn(#[source] io::Error),
}

/// Failure of a single reverse lookup. The mapper skips the address and keeps going.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no PTR record for {0}")]
    NotFound(Ipv4Addr),
    #[error("reverse lookup for {0} timed out")]
    Timeout(Ipv4Addr),
    #[error("malformed DNS response: {0}")]
    Malformed(String),
    #[error("DNS server returned rcode {rcode} for {addr}")]
    ServerFailure { addr: Ipv4Addr, rcode: u8 },
    #[error("lookup task for {0} was aborted")]
    Aborted(Ipv4Addr),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixParseError {
    #[error("invalid subnet prefix: {0}")]
    Invalid(String),
    #[error("only /24 prefixes are swept, got /{0}")]
    UnsupportedLength(u8),
}
