//! Reachability probes. Every failure mode collapses to "not reachable".

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use netsweep_core::ports::DEFAULT_PROBE_PORTS;
use thiserror::Error;
use tracing::trace;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Extra time a `ping` child gets beyond its own `-W` before it is killed.
const PING_GRACE: Duration = Duration::from_millis(500);
const PING_POLL: Duration = Duration::from_millis(20);

/// Single-attempt, bounded-wait reachability check.
pub trait Probe: Send + Sync {
    fn probe(&self, addr: Ipv4Addr) -> bool;
}

impl<F> Probe for F
where
    F: Fn(Ipv4Addr) -> bool + Send + Sync,
{
    fn probe(&self, addr: Ipv4Addr) -> bool {
        self(addr)
    }
}

/// Why a probe said "no". Only ever logged.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch ping: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait for ping: {0}")]
    Wait(#[source] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
}

/// ICMP echo through the system `ping` utility.
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        PingProbe { timeout }
    }

    fn command(&self, addr: Ipv4Addr) -> Command {
        let mut cmd = Command::new("ping");
        #[cfg(target_os = "windows")]
        {
            let wait_ms = self.timeout.as_millis().max(1).to_string();
            cmd.args(["-n", "1", "-w", wait_ms.as_str()]);
        }
        #[cfg(not(target_os = "windows"))]
        {
            let secs = self.timeout_secs().to_string();
            // BSD/macOS ping spells the overall deadline -t; Linux uses -W.
            let flag = if cfg!(target_os = "macos") { "-t" } else { "-W" };
            cmd.args(["-c", "1", flag, secs.as_str()]);
        }
        cmd.arg(addr.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    #[cfg_attr(target_os = "windows", allow(dead_code))]
    fn timeout_secs(&self) -> u64 {
        // ping only takes whole seconds here; round up so short timeouts still wait.
        let ms = self.timeout.as_millis() as u64;
        ((ms + 999) / 1000).max(1)
    }

    pub fn try_probe(&self, addr: Ipv4Addr) -> Result<bool, ProbeError> {
        run_bounded(self.command(addr), self.timeout)
    }
}

/// Run `cmd` to completion, killing it once `timeout` plus the grace period has passed.
fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<bool, ProbeError> {
    let mut child = cmd.spawn().map_err(ProbeError::Spawn)?;
    let deadline = Instant::now() + timeout + PING_GRACE;
    loop {
        if let Some(status) = child.try_wait().map_err(ProbeError::Wait)? {
            return Ok(status.success());
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProbeError::Timeout(timeout));
        }
        thread::sleep(PING_POLL);
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        PingProbe::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl Probe for PingProbe {
    fn probe(&self, addr: Ipv4Addr) -> bool {
        self.try_probe(addr).unwrap_or_else(|e| {
            trace!(%addr, error = %e, "ping probe failed");
            false
        })
    }
}

/// TCP connect liveness check: the host is up if any port accepts or actively refuses.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    ports: Vec<u16>,
    per_attempt: Duration,
}

impl TcpProbe {
    pub fn new(ports: Vec<u16>, per_attempt: Duration) -> Self {
        // connect_timeout rejects a zero duration
        let per_attempt = per_attempt.max(Duration::from_millis(1));
        TcpProbe { ports, per_attempt }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn try_probe(&self, addr: Ipv4Addr) -> Result<bool, ProbeError> {
        let mut last_err = None;
        for &port in &self.ports {
            match TcpStream::connect_timeout(&SocketAddr::from((addr, port)), self.per_attempt) {
                Ok(_) => return Ok(true),
                // A RST still proves something answered at that address.
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(ProbeError::Connect(e)),
            None => Ok(false),
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        TcpProbe::new(DEFAULT_PROBE_PORTS.to_vec(), DEFAULT_PROBE_TIMEOUT)
    }
}

impl Probe for TcpProbe {
    fn probe(&self, addr: Ipv4Addr) -> bool {
        self.try_probe(addr).unwrap_or_else(|e| {
            trace!(%addr, error = %e, "tcp probe failed");
            false
        })
    }
}
