//! Rendering of the final mapping or host records.

use anyhow::Result;
use clap::ValueEnum;
use host_mapper::{HostRecord, LookupFailure};
use netsweep_core::SubnetPrefix;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::net::Ipv4Addr;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Jsonl,
    Csv,
}

/// Facts about the run that accompany the results in JSON output.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub prefix: SubnetPrefix,
    pub started_at: String,
    pub duration_ms: u128,
    pub live: usize,
    /// The sweep was interrupted, so `live` covers only the probed candidates.
    pub cancelled: bool,
}

pub enum Results<'a> {
    Mapping(&'a BTreeMap<String, Ipv4Addr>),
    Records(&'a [(Ipv4Addr, HostRecord)]),
}

fn failures_json(failures: &[LookupFailure]) -> serde_json::Value {
    failures
        .iter()
        .map(|f| serde_json::json!({ "address": f.address, "error": f.error.to_string() }))
        .collect()
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

pub fn render(
    w: &mut dyn Write,
    format: OutputFormat,
    info: &RunInfo,
    results: &Results<'_>,
    failures: &[LookupFailure],
) -> Result<()> {
    match format {
        OutputFormat::Text => match results {
            Results::Mapping(hosts) => {
                for (name, addr) in hosts.iter() {
                    writeln!(w, "{} -> {}", name, addr)?;
                }
            }
            Results::Records(records) => {
                for (_, r) in records.iter() {
                    writeln!(w, "({}, [{}], [{}])", r.hostname, join(&r.aliases), join(&r.addresses))?;
                }
            }
        },
        OutputFormat::Json => {
            let mut obj = serde_json::json!({
                "prefix": info.prefix,
                "started_at": info.started_at,
                "duration_ms": info.duration_ms,
                "live": info.live,
                "cancelled": info.cancelled,
                "failures": failures_json(failures),
            });
            match results {
                Results::Mapping(hosts) => obj["hosts"] = serde_json::to_value(hosts)?,
                Results::Records(records) => {
                    let recs: Vec<&HostRecord> = records.iter().map(|(_, r)| r).collect();
                    obj["records"] = serde_json::to_value(recs)?;
                }
            }
            writeln!(w, "{}", serde_json::to_string(&obj)?)?;
        }
        OutputFormat::Jsonl => match results {
            Results::Mapping(hosts) => {
                for (name, addr) in hosts.iter() {
                    writeln!(w, "{}", serde_json::json!({ "hostname": name, "address": addr }))?;
                }
            }
            Results::Records(records) => {
                for (_, r) in records.iter() {
                    writeln!(w, "{}", serde_json::to_string(r)?)?;
                }
            }
        },
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(w);
            match results {
                Results::Mapping(hosts) => {
                    wtr.write_record(["hostname", "address"])?;
                    for (name, addr) in hosts.iter() {
                        wtr.write_record([name.clone(), addr.to_string()])?;
                    }
                }
                Results::Records(records) => {
                    wtr.write_record(["hostname", "aliases", "addresses"])?;
                    for (_, r) in records.iter() {
                        let addrs: Vec<String> = r.addresses.iter().map(|a| a.to_string()).collect();
                        wtr.write_record([r.hostname.clone(), r.aliases.join("|"), addrs.join("|")])?;
                    }
                }
            }
            wtr.flush()?;
        }
    }
    Ok(())
}
