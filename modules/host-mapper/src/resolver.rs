//! Reverse lookups over plain UDP DNS.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use netsweep_core::{LookupError, SubnetPrefix};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::dns;
use crate::{HostRecord, ReverseLookup};

pub const DNS_PORT: u16 = 53;
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(1500);
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// First IPv4 `nameserver` line of a resolv.conf body.
pub fn parse_resolv_conf(text: &str) -> Option<Ipv4Addr> {
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.starts_with('#') && !l.starts_with(';'))
        .filter_map(|l| l.strip_prefix("nameserver"))
        .filter_map(|rest| rest.trim().parse::<Ipv4Addr>().ok())
        .next()
}

/// The system resolver from `/etc/resolv.conf`, if there is an IPv4 one.
pub fn system_nameserver() -> Option<SocketAddr> {
    let text = fs::read_to_string(Path::new(RESOLV_CONF)).ok()?;
    parse_resolv_conf(&text).map(|ip| SocketAddr::from((ip, DNS_PORT)))
}

/// Sends PTR queries to one DNS server, then forward-resolves the returned name
/// to fill in the address list.
#[derive(Debug)]
pub struct DnsReverseLookup {
    server: SocketAddr,
    timeout: Duration,
    forward: bool,
    next_id: AtomicU16,
}

impl DnsReverseLookup {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        DnsReverseLookup {
            server,
            timeout,
            forward: true,
            next_id: AtomicU16::new(std::process::id() as u16),
        }
    }

    /// Use the system nameserver, falling back to `prefix.1` (usually the router).
    pub fn for_prefix(prefix: SubnetPrefix, timeout: Duration) -> Self {
        let server = system_nameserver().unwrap_or_else(|| SocketAddr::from((prefix.host(1), DNS_PORT)));
        DnsReverseLookup::new(server, timeout)
    }

    /// Skip the forward lookup; the address list is then just the queried address.
    pub fn without_forward_lookup(mut self) -> Self {
        self.forward = false;
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    async fn query_ptr(&self, addr: Ipv4Addr) -> Result<Vec<String>, LookupError> {
        let bind: SocketAddr = match self.server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
        };
        let sock = UdpSocket::bind(bind).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let query = dns::build_ptr_query(addr, id);

        timeout(self.timeout, self.exchange(&sock, &query, id, addr))
            .await
            .map_err(|_| LookupError::Timeout(addr))?
    }

    async fn exchange(
        &self,
        sock: &UdpSocket,
        query: &[u8],
        id: u16,
        addr: Ipv4Addr,
    ) -> Result<Vec<String>, LookupError> {
        sock.send_to(query, self.server).await?;
        let mut buf = [0u8; 1500];
        loop {
            let (n, from) = sock.recv_from(&mut buf).await?;
            if from != self.server || dns::response_id(&buf[..n]) != Some(id) {
                trace!(%from, "ignoring unrelated datagram");
                continue;
            }
            return dns::parse_ptr_response(&buf[..n], addr);
        }
    }

    async fn forward_addresses(&self, hostname: &str, addr: Ipv4Addr) -> Vec<Ipv4Addr> {
        let mut out = Vec::new();
        if self.forward {
            match timeout(self.timeout, tokio::net::lookup_host((hostname, 0u16))).await {
                Ok(Ok(addrs)) => {
                    for sa in addrs {
                        if let IpAddr::V4(v4) = sa.ip() {
                            if !out.contains(&v4) {
                                out.push(v4);
                            }
                        }
                    }
                }
                Ok(Err(e)) => debug!(hostname, error = %e, "forward lookup failed"),
                Err(_) => debug!(hostname, "forward lookup timed out"),
            }
        }
        if !out.contains(&addr) {
            out.insert(0, addr);
        }
        out
    }
}

#[async_trait]
impl ReverseLookup for DnsReverseLookup {
    async fn reverse_lookup(&self, addr: Ipv4Addr) -> Result<HostRecord, LookupError> {
        let mut names = self.query_ptr(addr).await?.into_iter();
        let hostname = names.next().ok_or(LookupError::NotFound(addr))?;
        let aliases: Vec<String> = names.collect();
        let addresses = self.forward_addresses(&hostname, addr).await;
        Ok(HostRecord { hostname, aliases, addresses })
    }
}
