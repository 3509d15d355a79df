//! Host discovery via a bounded worker-pool sweep of the local /24.
//!
//! The sweep resolves the local address, derives its [`SubnetPrefix`], and hands
//! every candidate `prefix.1..=prefix.254` to a fixed pool of worker threads that
//! run a [`Probe`] against it. Each worker stops after consuming exactly one stop
//! sentinel, so the pool is always joinable.

mod local;
mod probe;
mod sweep;

pub use local::{resolve_local_address, LocalAddressSource, UdpRouteResolver, DEFAULT_ANCHOR};
pub use netsweep_core::{SubnetPrefix, SweepError};
pub use probe::{PingProbe, Probe, ProbeError, TcpProbe, DEFAULT_PROBE_TIMEOUT};
pub use sweep::{
    sweep, sweep_local, sweep_prefix, CancelFlag, SweepOptions, SweepReport, DEFAULT_POOL_SIZE,
    MAX_POOL_SIZE,
};
