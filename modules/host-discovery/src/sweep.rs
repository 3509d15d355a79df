//! Sweep coordinator: a fixed pool of worker threads fed by a job channel and
//! stopped by one sentinel per worker.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use netsweep_core::{SubnetPrefix, SweepError, LAST_HOST};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::local::{LocalAddressSource, UdpRouteResolver};
use crate::probe::{PingProbe, Probe};

pub const DEFAULT_POOL_SIZE: usize = 255;
/// Upper bound on worker threads; a /24 never has more than 254 candidates.
pub const MAX_POOL_SIZE: usize = 1024;

/// Cooperative cancellation, checked by workers between job pulls.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub pool_size: usize,
    pub cancel: Option<CancelFlag>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions { pool_size: DEFAULT_POOL_SIZE, cancel: None }
    }
}

impl SweepOptions {
    pub fn with_pool_size(pool_size: usize) -> Self {
        SweepOptions { pool_size, ..SweepOptions::default() }
    }

    fn validate(&self) -> Result<(), SweepError> {
        if (1..=MAX_POOL_SIZE).contains(&self.pool_size) {
            Ok(())
        } else {
            Err(SweepError::InvalidPoolSize { requested: self.pool_size, max: MAX_POOL_SIZE })
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub prefix: SubnetPrefix,
    pub live: BTreeSet<Ipv4Addr>,
    pub workers_joined: usize,
    pub workers_panicked: usize,
    pub jobs_enqueued: usize,
    pub jobs_probed: usize,
    pub jobs_skipped: usize,
    pub sentinels_consumed: usize,
    #[serde(skip)]
    pub elapsed: Duration,
    pub cancelled: bool,
}

enum Job {
    Probe(Ipv4Addr),
    Stop,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    probed: usize,
    skipped: usize,
    stopped: bool,
}

/// Resolve the local address with the default anchor and ping every host of its /24.
///
/// The pool size is checked before the network is touched.
pub fn sweep_local(pool_size: usize) -> Result<BTreeSet<Ipv4Addr>, SweepError> {
    let probe: Arc<dyn Probe> = Arc::new(PingProbe::default());
    let report = sweep(&UdpRouteResolver::default(), probe, &SweepOptions::with_pool_size(pool_size))?;
    Ok(report.live)
}

/// Full sweep: local address → prefix → probe every candidate.
///
/// Only a failure to determine the local address (or to start the pool) is an
/// error; individual probes never abort the sweep.
pub fn sweep(
    local: &dyn LocalAddressSource,
    probe: Arc<dyn Probe>,
    opts: &SweepOptions,
) -> Result<SweepReport, SweepError> {
    opts.validate()?;
    let local_addr = local.resolve_local_address()?;
    let prefix = SubnetPrefix::from(local_addr);
    info!(%local_addr, %prefix, pool_size = opts.pool_size, "starting sweep");
    sweep_prefix(prefix, probe, opts)
}

/// Probe `prefix.1..=prefix.254` with exactly `opts.pool_size` workers.
pub fn sweep_prefix(
    prefix: SubnetPrefix,
    probe: Arc<dyn Probe>,
    opts: &SweepOptions,
) -> Result<SweepReport, SweepError> {
    opts.validate()?;
    let started = Instant::now();

    // Jobs are bounded so candidates are produced only as fast as workers take them.
    // Results must stay unbounded: they are drained only after every worker joined.
    let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(opts.pool_size.min(usize::from(LAST_HOST)));
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Ipv4Addr>();

    let mut handles: Vec<JoinHandle<WorkerStats>> = Vec::new();
    for idx in 0..opts.pool_size {
        let jobs = job_rx.clone();
        let results = result_tx.clone();
        let probe = Arc::clone(&probe);
        let cancel = opts.cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("sweep-worker-{idx}"))
            .spawn(move || run_worker(&jobs, &results, probe.as_ref(), cancel.as_ref()));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                stop_and_join(&job_tx, handles);
                return Err(SweepError::WorkerSpawn(e));
            }
        }
    }
    drop(job_rx);
    drop(result_tx);

    let mut jobs_enqueued = 0;
    for addr in prefix.candidates() {
        if job_tx.send(Job::Probe(addr)).is_err() {
            // Every receiver is gone, which only happens if all workers panicked.
            warn!(%prefix, "all sweep workers exited early; stopping enqueue");
            break;
        }
        jobs_enqueued += 1;
    }
    for _ in 0..handles.len() {
        if job_tx.send(Job::Stop).is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut report = SweepReport {
        prefix,
        live: BTreeSet::new(),
        workers_joined: 0,
        workers_panicked: 0,
        jobs_enqueued,
        jobs_probed: 0,
        jobs_skipped: 0,
        sentinels_consumed: 0,
        elapsed: Duration::ZERO,
        cancelled: false,
    };
    for handle in handles {
        let name = handle.thread().name().unwrap_or("sweep-worker").to_string();
        match handle.join() {
            Ok(stats) => {
                report.workers_joined += 1;
                report.jobs_probed += stats.probed;
                report.jobs_skipped += stats.skipped;
                if stats.stopped {
                    report.sentinels_consumed += 1;
                }
            }
            Err(_) => {
                report.workers_panicked += 1;
                warn!(worker = %name, "sweep worker panicked; continuing with remaining results");
            }
        }
    }

    report.live = result_rx.try_iter().collect();
    report.elapsed = started.elapsed();
    report.cancelled = opts.cancel.as_ref().is_some_and(|c| c.is_cancelled());
    info!(
        %prefix,
        live = report.live.len(),
        probed = report.jobs_probed,
        workers = report.workers_joined,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "sweep finished"
    );
    Ok(report)
}

fn run_worker(
    jobs: &Receiver<Job>,
    results: &Sender<Ipv4Addr>,
    probe: &dyn Probe,
    cancel: Option<&CancelFlag>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    // recv only fails once the coordinator dropped its sender, which it does
    // after queueing this worker's sentinel.
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Stop => {
                stats.stopped = true;
                break;
            }
            Job::Probe(addr) => {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    stats.skipped += 1;
                    continue;
                }
                stats.probed += 1;
                if probe.probe(addr) {
                    debug!(%addr, "host is up");
                    let _ = results.send(addr);
                }
            }
        }
    }
    stats
}

fn stop_and_join(job_tx: &Sender<Job>, handles: Vec<JoinHandle<WorkerStats>>) {
    for _ in 0..handles.len() {
        let _ = job_tx.send(Job::Stop);
    }
    for handle in handles {
        let _ = handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    struct FixedLocal(Ipv4Addr);

    impl LocalAddressSource for FixedLocal {
        fn resolve_local_address(&self) -> Result<Ipv4Addr, SweepError> {
            Ok(self.0)
        }
    }

    struct NoRoute;

    impl LocalAddressSource for NoRoute {
        fn resolve_local_address(&self) -> Result<Ipv4Addr, SweepError> {
            Err(SweepError::NetworkUnavailable("no default route".into()))
        }
    }

    /// In-memory subnet: fixed reachable set, per-octet call counters.
    struct SimulatedSubnet {
        reachable: HashSet<Ipv4Addr>,
        calls: Vec<AtomicUsize>,
    }

    impl SimulatedSubnet {
        fn new(reachable: &[Ipv4Addr]) -> Arc<Self> {
            Arc::new(SimulatedSubnet {
                reachable: reachable.iter().copied().collect(),
                calls: (0..256).map(|_| AtomicUsize::new(0)).collect(),
            })
        }

        fn calls_for(&self, host: u8) -> usize {
            self.calls[host as usize].load(Ordering::SeqCst)
        }
    }

    impl Probe for SimulatedSubnet {
        fn probe(&self, addr: Ipv4Addr) -> bool {
            self.calls[addr.octets()[3] as usize].fetch_add(1, Ordering::SeqCst);
            self.reachable.contains(&addr)
        }
    }

    fn prefix() -> SubnetPrefix {
        SubnetPrefix::new(192, 168, 1)
    }

    fn reachable() -> Vec<Ipv4Addr> {
        [1u8, 5, 100, 254].iter().map(|&h| prefix().host(h)).collect()
    }

    #[test]
    fn returns_exactly_the_reachable_set_for_many_pool_sizes() {
        let want: BTreeSet<Ipv4Addr> = reachable().into_iter().collect();
        for p in [1usize, 2, 3, 7, 16, 64, 127, 253, 254, 255, 300] {
            let subnet = SimulatedSubnet::new(&reachable());
            let report = sweep_prefix(prefix(), subnet.clone(), &SweepOptions::with_pool_size(p)).unwrap();
            assert_eq!(report.live, want, "pool size {p}");
            assert_eq!(report.workers_joined, p);
            assert_eq!(report.sentinels_consumed, p);
            assert_eq!(report.workers_panicked, 0);
            assert_eq!(report.jobs_enqueued, 254);
            assert_eq!(report.jobs_probed, 254);
        }
    }

    #[test]
    fn every_candidate_is_probed_exactly_once() {
        let subnet = SimulatedSubnet::new(&reachable());
        sweep_prefix(prefix(), subnet.clone(), &SweepOptions::with_pool_size(32)).unwrap();
        assert_eq!(subnet.calls_for(0), 0);
        assert_eq!(subnet.calls_for(255), 0);
        for h in 1..=254u8 {
            assert_eq!(subnet.calls_for(h), 1, "host .{h}");
        }
    }

    #[test]
    fn single_worker_processes_everything_serially() {
        let subnet = SimulatedSubnet::new(&reachable());
        let report = sweep_prefix(prefix(), subnet, &SweepOptions::with_pool_size(1)).unwrap();
        assert_eq!(report.live.len(), 4);
        assert_eq!(report.jobs_probed, 254);
        assert_eq!(report.sentinels_consumed, 1);
    }

    #[test]
    fn repeated_sweeps_agree() {
        let subnet = SimulatedSubnet::new(&reachable());
        let a = sweep_prefix(prefix(), subnet.clone(), &SweepOptions::with_pool_size(20)).unwrap();
        let b = sweep_prefix(prefix(), subnet, &SweepOptions::with_pool_size(20)).unwrap();
        assert_eq!(a.live, b.live);
    }

    #[test]
    fn empty_subnet_is_a_valid_result() {
        let subnet = SimulatedSubnet::new(&[]);
        let report = sweep_prefix(prefix(), subnet, &SweepOptions::default()).unwrap();
        assert!(report.live.is_empty());
        assert_eq!(report.workers_joined, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn sweep_derives_prefix_from_local_address() {
        let local = FixedLocal(Ipv4Addr::new(192, 168, 1, 42));
        let subnet = SimulatedSubnet::new(&reachable());
        let report = sweep(&local, subnet, &SweepOptions::with_pool_size(8)).unwrap();
        assert_eq!(report.prefix, prefix());
        assert_eq!(report.live.len(), 4);
    }

    #[test]
    fn missing_route_is_fatal() {
        let subnet = SimulatedSubnet::new(&reachable());
        let err = sweep(&NoRoute, subnet.clone(), &SweepOptions::default()).unwrap_err();
        assert!(matches!(err, SweepError::NetworkUnavailable(_)));
        assert_eq!(subnet.calls_for(1), 0);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let subnet = SimulatedSubnet::new(&reachable());
        let err = sweep_prefix(prefix(), subnet, &SweepOptions::with_pool_size(0)).unwrap_err();
        assert!(matches!(err, SweepError::InvalidPoolSize { requested: 0, .. }));
    }

    #[test]
    fn oversized_pool_is_rejected_before_any_worker_starts() {
        for p in [MAX_POOL_SIZE + 1, 1_000_000_000, usize::MAX] {
            let subnet = SimulatedSubnet::new(&reachable());
            let err = sweep_prefix(prefix(), subnet.clone(), &SweepOptions::with_pool_size(p)).unwrap_err();
            assert!(
                matches!(err, SweepError::InvalidPoolSize { requested, max: MAX_POOL_SIZE } if requested == p),
                "pool size {p}"
            );
            assert_eq!(subnet.calls_for(1), 0);
        }
    }

    #[test]
    fn largest_pool_still_sweeps() {
        let subnet = SimulatedSubnet::new(&reachable());
        let report = sweep_prefix(prefix(), subnet, &SweepOptions::with_pool_size(MAX_POOL_SIZE)).unwrap();
        assert_eq!(report.live.len(), 4);
        assert_eq!(report.workers_joined, MAX_POOL_SIZE);
        assert_eq!(report.sentinels_consumed, MAX_POOL_SIZE);
    }

    #[test]
    fn bad_pool_size_is_reported_before_resolving_the_local_address() {
        let subnet = SimulatedSubnet::new(&reachable());
        let err = sweep(&NoRoute, subnet, &SweepOptions::with_pool_size(0)).unwrap_err();
        assert!(matches!(err, SweepError::InvalidPoolSize { .. }));
    }

    #[test]
    fn sweep_local_validates_the_pool_size() {
        assert!(matches!(sweep_local(0), Err(SweepError::InvalidPoolSize { requested: 0, .. })));
        assert!(matches!(sweep_local(usize::MAX), Err(SweepError::InvalidPoolSize { .. })));
    }

    #[test]
    fn panicking_probe_does_not_hang_the_sweep() {
        let probe = |addr: Ipv4Addr| {
            let host = addr.octets()[3];
            if host == 7 {
                panic!("probe blew up on {addr}");
            }
            host == 5 || host == 100
        };
        let report = sweep_prefix(prefix(), Arc::new(probe), &SweepOptions::with_pool_size(4)).unwrap();
        assert_eq!(report.workers_panicked, 1);
        assert_eq!(report.workers_joined, 3);
        assert_eq!(report.sentinels_consumed, 3);
        let want: BTreeSet<_> = [prefix().host(5), prefix().host(100)].into_iter().collect();
        assert_eq!(report.live, want);
    }

    #[test]
    fn cancelled_sweep_still_joins_every_worker() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let subnet = SimulatedSubnet::new(&reachable());
        let opts = SweepOptions { pool_size: 10, cancel: Some(cancel) };
        let report = sweep_prefix(prefix(), subnet.clone(), &opts).unwrap();
        assert!(report.cancelled);
        assert!(report.live.is_empty());
        assert_eq!(report.workers_joined, 10);
        assert_eq!(report.sentinels_consumed, 10);
        assert_eq!(report.jobs_skipped, 254);
        assert_eq!(subnet.calls_for(5), 0);
    }
}
