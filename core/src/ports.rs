//! Port-list parsing for the TCP reachability probe.

use std::ops::RangeInclusive;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortParseError {
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid port range: {0}")]
    InvalidRange(String),
    #[error("port list is empty")]
    Empty,
}

/// Ports probed for liveness when none are configured.
pub const DEFAULT_PROBE_PORTS: &[u16] = &[80, 443, 22];

/// Parse a comma-separated list of ports and inclusive ranges ("22,80,443",
/// "8000-8010, 22"). The result is sorted and free of duplicates.
pub fn parse_ports(list: &str) -> Result<Vec<u16>, PortParseError> {
    let mut ports = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        ports.extend(parse_part(part)?);
    }
    if ports.is_empty() {
        return Err(PortParseError::Empty);
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

fn parse_part(part: &str) -> Result<RangeInclusive<u16>, PortParseError> {
    let nonzero = |s: &str| s.trim().parse::<u16>().ok().filter(|&p| p != 0);
    match part.split_once('-') {
        Some((lo, hi)) => match (nonzero(lo), nonzero(hi)) {
            (Some(lo), Some(hi)) if lo <= hi => Ok(lo..=hi),
            _ => Err(PortParseError::InvalidRange(part.to_string())),
        },
        None => nonzero(part)
            .map(|p| p..=p)
            .ok_or_else(|| PortParseError::InvalidPort(part.to_string())),
    }
}
