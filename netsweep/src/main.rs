use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use host_discovery::{
    sweep, sweep_prefix, CancelFlag, PingProbe, Probe, SweepOptions, SweepReport, TcpProbe,
    UdpRouteResolver, DEFAULT_ANCHOR, DEFAULT_POOL_SIZE, DEFAULT_PROBE_TIMEOUT,
};
use host_mapper::{
    lookup_records, map_hosts, DnsReverseLookup, ReverseLookup, DEFAULT_LOOKUP_CONCURRENCY,
    DEFAULT_LOOKUP_TIMEOUT, DNS_PORT,
};
use netsweep_core::ports::{parse_ports, DEFAULT_PROBE_PORTS};
use netsweep_core::SubnetPrefix;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

mod config;
mod logging;
mod output;

use config::{Config, ProbeKind};
use output::{OutputFormat, Results, RunInfo};

/// Conventional status for a run ended by SIGINT (128 + 2).
const INTERRUPTED_EXIT: u8 = 130;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// `host:port` or a bare IP (port defaults to `default_port`).
fn parse_endpoint(s: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(sa) = s.parse::<SocketAddr>() {
        return Ok(sa);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| anyhow!("invalid address: {}", s))
}

fn parse_dns_server(s: &str) -> Result<SocketAddr> {
    parse_endpoint(s, DNS_PORT)
}

fn parse_anchor(s: &str) -> Result<SocketAddr> {
    parse_endpoint(s, 80)
}

#[derive(Debug, Parser)]
#[command(name = "netsweep", version, about = "Find live hosts on the local /24 and name them")]
struct Cli {
    /// Number of concurrent probe workers
    pool_size: Option<usize>,
    /// Optional config file (YAML). If omitted, loads ./netsweep.yaml if present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print (hostname, aliases, addresses) records instead of the hostname mapping
    #[arg(long)]
    records: bool,
    /// Reachability check to use
    #[arg(long, value_enum)]
    probe: Option<ProbeKind>,
    /// Ports for the tcp probe (default: 80,443,22)
    #[arg(long)]
    ports: Option<String>,
    /// Probe timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Address used to pick the outgoing interface (nothing is sent to it)
    #[arg(long, value_parser = parse_anchor)]
    anchor: Option<SocketAddr>,
    /// Sweep this /24 (e.g. 192.168.1.0/24) instead of the local one
    #[arg(long)]
    prefix: Option<SubnetPrefix>,
    /// DNS server for reverse lookups (default: system resolver, then <prefix>.1)
    #[arg(long, value_parser = parse_dns_server)]
    dns_server: Option<SocketAddr>,
    /// Timeout per reverse lookup in milliseconds
    #[arg(long)]
    lookup_timeout_ms: Option<u64>,
    /// Max concurrent reverse lookups
    #[arg(long)]
    lookup_concurrency: Option<usize>,
    /// Output format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Output file (overwrites)
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    /// More log output on stderr (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Effective run parameters: flag, then config file, then built-in default.
#[derive(Debug, Clone)]
struct Settings {
    pool_size: usize,
    probe: ProbeKind,
    ports: Vec<u16>,
    probe_timeout: Duration,
    anchor: SocketAddr,
    prefix: Option<SubnetPrefix>,
    dns_server: Option<SocketAddr>,
    lookup_timeout: Duration,
    lookup_concurrency: usize,
    format: OutputFormat,
    records: bool,
    out: Option<PathBuf>,
}

impl Settings {
    fn resolve(cli: &Cli, cfg: Option<&Config>) -> Result<Settings> {
        let sweep = cfg.and_then(|c| c.sweep.clone()).unwrap_or_default();
        let lookup = cfg.and_then(|c| c.lookup.clone()).unwrap_or_default();
        let out_cfg = cfg.and_then(|c| c.output.clone()).unwrap_or_default();

        let ports = match cli.ports.as_deref().or(sweep.ports.as_deref()) {
            Some(spec) => parse_ports(spec)?,
            None => DEFAULT_PROBE_PORTS.to_vec(),
        };
        let anchor = match (cli.anchor, sweep.anchor.as_deref()) {
            (Some(a), _) => a,
            (None, Some(s)) => parse_anchor(s).context("config sweep.anchor")?,
            (None, None) => DEFAULT_ANCHOR,
        };
        let prefix = match (cli.prefix, sweep.prefix.as_deref()) {
            (Some(p), _) => Some(p),
            (None, Some(s)) => Some(s.parse::<SubnetPrefix>().context("config sweep.prefix")?),
            (None, None) => None,
        };
        let dns_server = match (cli.dns_server, lookup.dns_server.as_deref()) {
            (Some(d), _) => Some(d),
            (None, Some(s)) => Some(parse_dns_server(s).context("config lookup.dns_server")?),
            (None, None) => None,
        };
        Ok(Settings {
            pool_size: cli.pool_size.or(sweep.pool_size).unwrap_or(DEFAULT_POOL_SIZE),
            probe: cli.probe.or(sweep.probe).unwrap_or_default(),
            ports,
            probe_timeout: cli
                .timeout_ms
                .or(sweep.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PROBE_TIMEOUT),
            anchor,
            prefix,
            dns_server,
            lookup_timeout: cli
                .lookup_timeout_ms
                .or(lookup.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOOKUP_TIMEOUT),
            lookup_concurrency: cli
                .lookup_concurrency
                .or(lookup.concurrency)
                .unwrap_or(DEFAULT_LOOKUP_CONCURRENCY),
            format: cli.format.or(out_cfg.format).unwrap_or_default(),
            records: cli.records || out_cfg.records.unwrap_or(false),
            out: cli.out.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Stop handing out probes and let the sweep wind down.
    CancelSweep,
    /// Leave right away.
    Exit,
}

/// The first Ctrl-C during the sweep cancels it; any other Ctrl-C ends the process.
fn interrupt_action(sweeping: bool, already_cancelled: bool) -> InterruptAction {
    if sweeping && !already_cancelled {
        InterruptAction::CancelSweep
    } else {
        InterruptAction::Exit
    }
}

/// Listens for Ctrl-C for as long as the returned handle is alive.
fn spawn_interrupt_listener(cancel: CancelFlag, sweeping: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupt_action(sweeping.load(Ordering::SeqCst), cancel.is_cancelled()) {
                InterruptAction::CancelSweep => {
                    warn!("interrupted; remaining candidates will not be probed (Ctrl-C again to quit)");
                    cancel.cancel();
                }
                InterruptAction::Exit => {
                    warn!("interrupted; exiting");
                    std::process::exit(i32::from(INTERRUPTED_EXIT));
                }
            }
        }
    })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);
    let loaded_cfg = config::load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, loaded_cfg.as_ref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(settings))
}

async fn run(s: Settings) -> Result<ExitCode> {
    let started_at = now_rfc3339();
    let started = Instant::now();

    let probe: Arc<dyn Probe> = match s.probe {
        ProbeKind::Ping => Arc::new(PingProbe::new(s.probe_timeout)),
        ProbeKind::Tcp => Arc::new(TcpProbe::new(s.ports.clone(), s.probe_timeout)),
    };
    let cancel = CancelFlag::new();
    let opts = SweepOptions { pool_size: s.pool_size, cancel: Some(cancel.clone()) };
    let sweeping = Arc::new(AtomicBool::new(true));
    let interrupt = spawn_interrupt_listener(cancel, Arc::clone(&sweeping));

    let (anchor, prefix) = (s.anchor, s.prefix);
    let report = tokio::task::spawn_blocking(move || match prefix {
        Some(p) => sweep_prefix(p, probe, &opts),
        None => sweep(&UdpRouteResolver::new(anchor), probe, &opts),
    })
    .await
    .context("sweep task failed")??;
    sweeping.store(false, Ordering::SeqCst);
    if report.cancelled {
        warn!(
            probed = report.jobs_probed,
            skipped = report.jobs_skipped,
            "sweep was interrupted; results are partial"
        );
    }

    let resolver = match s.dns_server {
        Some(server) => DnsReverseLookup::new(server, s.lookup_timeout),
        None => DnsReverseLookup::for_prefix(report.prefix, s.lookup_timeout),
    };
    info!(server = %resolver.server(), live = report.live.len(), "resolving live hosts");
    let resolver: Arc<dyn ReverseLookup> = Arc::new(resolver);
    let live = report.live.iter().copied();

    let mut sink: Box<dyn Write> = match &s.out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    if s.records {
        let outcome = lookup_records(live, resolver, s.lookup_concurrency).await;
        let info = run_info(&report, &started_at, started);
        output::render(sink.as_mut(), s.format, &info, &Results::Records(&outcome.records), &outcome.failures)?;
    } else {
        let mapping = map_hosts(live, resolver, s.lookup_concurrency).await;
        let info = run_info(&report, &started_at, started);
        output::render(sink.as_mut(), s.format, &info, &Results::Mapping(&mapping.hosts), &mapping.failures)?;
    }
    sink.flush()?;
    interrupt.abort();
    Ok(ExitCode::from(exit_status(report.cancelled)))
}

/// A completed sweep exits 0 even when nothing answered; an interrupted one does not.
fn exit_status(cancelled: bool) -> u8 {
    if cancelled {
        INTERRUPTED_EXIT
    } else {
        0
    }
}

fn run_info(report: &SweepReport, started_at: &str, started: Instant) -> RunInfo {
    RunInfo {
        prefix: report.prefix,
        started_at: started_at.to_string(),
        duration_ms: started.elapsed().as_millis(),
        live: report.live.len(),
        cancelled: report.cancelled,
    }
}
