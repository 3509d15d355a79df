use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use netsweep_core::SweepError;
use tracing::debug;

/// Public resolver used as the routing anchor. Nothing is ever sent to it.
pub const DEFAULT_ANCHOR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80));

/// Source of the sweeping host's own IPv4 address.
pub trait LocalAddressSource: Send + Sync {
    fn resolve_local_address(&self) -> Result<Ipv4Addr, SweepError>;
}

/// Asks the routing table which local endpoint would be used to reach `anchor`.
///
/// `connect` on a UDP socket only selects a route; no datagram leaves the host.
#[derive(Debug, Clone, Copy)]
pub struct UdpRouteResolver {
    anchor: SocketAddr,
}

impl UdpRouteResolver {
    pub fn new(anchor: SocketAddr) -> Self {
        UdpRouteResolver { anchor }
    }

    pub fn anchor(&self) -> SocketAddr {
        self.anchor
    }
}

impl Default for UdpRouteResolver {
    fn default() -> Self {
        UdpRouteResolver::new(DEFAULT_ANCHOR)
    }
}

impl LocalAddressSource for UdpRouteResolver {
    fn resolve_local_address(&self) -> Result<Ipv4Addr, SweepError> {
        let unavailable = |what: &str, e: std::io::Error| {
            SweepError::NetworkUnavailable(format!("{} (anchor {}): {}", what, self.anchor, e))
        };
        // The socket is dropped, and therefore closed, on every return path.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(|e| unavailable("bind failed", e))?;
        socket.connect(self.anchor).map_err(|e| unavailable("no route", e))?;
        let local = socket.local_addr().map_err(|e| unavailable("no local endpoint", e))?;
        match local.ip() {
            IpAddr::V4(v4) if !v4.is_unspecified() => {
                debug!(local = %v4, anchor = %self.anchor, "resolved local address");
                Ok(v4)
            }
            other => Err(SweepError::NetworkUnavailable(format!(
                "routing toward {} picked non-IPv4 endpoint {}",
                self.anchor, other
            ))),
        }
    }
}

/// Resolve the local address using the default anchor.
pub fn resolve_local_address() -> Result<Ipv4Addr, SweepError> {
    UdpRouteResolver::default().resolve_local_address()
}
