//! Reverse-lookup live addresses and build the hostname → address mapping.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::debug;

pub mod dns;
mod resolver;

pub use netsweep_core::LookupError;
pub use resolver::{parse_resolv_conf, system_nameserver, DnsReverseLookup, DEFAULT_LOOKUP_TIMEOUT, DNS_PORT};

pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 32;

/// What a reverse lookup knows about one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub hostname: String,
    pub aliases: Vec<String>,
    pub addresses: Vec<Ipv4Addr>,
}

#[async_trait]
pub trait ReverseLookup: Send + Sync {
    async fn reverse_lookup(&self, addr: Ipv4Addr) -> Result<HostRecord, LookupError>;
}

#[derive(Debug)]
pub struct LookupFailure {
    pub address: Ipv4Addr,
    pub error: LookupError,
}

/// Raw lookup results, in ascending address order.
#[derive(Debug, Default)]
pub struct LookupOutcome {
    pub records: Vec<(Ipv4Addr, HostRecord)>,
    pub failures: Vec<LookupFailure>,
}

#[derive(Debug, Default)]
pub struct MappingReport {
    pub hosts: BTreeMap<String, Ipv4Addr>,
    pub failures: Vec<LookupFailure>,
}

/// Entries of `addresses` that survive the gateway heuristic.
///
/// A single-entry list is taken as-is. Otherwise every address whose last octet
/// is `1` is dropped.
pub fn selected_addresses(addresses: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    if addresses.len() == 1 {
        return addresses.to_vec();
    }
    addresses.iter().copied().filter(|a| a.octets()[3] != 1).collect()
}

/// The address a record contributes to the mapping: the last one selected.
pub fn select_address(addresses: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    selected_addresses(addresses).last().copied()
}

/// Pair each hostname with its selected address. Later records overwrite
/// earlier ones with the same hostname; records with nothing selected are skipped.
pub fn build_mapping<'a>(records: impl IntoIterator<Item = &'a HostRecord>) -> BTreeMap<String, Ipv4Addr> {
    let mut hosts = BTreeMap::new();
    for rec in records {
        match select_address(&rec.addresses) {
            Some(addr) => {
                hosts.insert(rec.hostname.clone(), addr);
            }
            None => debug!(hostname = %rec.hostname, "no address left after filtering"),
        }
    }
    hosts
}

/// Reverse-lookup every address, at most `concurrency` at a time.
///
/// A failed lookup is recorded and never stops the others.
pub async fn lookup_records(
    addresses: impl IntoIterator<Item = Ipv4Addr>,
    resolver: Arc<dyn ReverseLookup>,
    concurrency: usize,
) -> LookupOutcome {
    let ordered: BTreeSet<Ipv4Addr> = addresses.into_iter().collect();
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));

    let mut tasks = Vec::with_capacity(ordered.len());
    for addr in ordered {
        let sem = sem.clone();
        let resolver = resolver.clone();
        tasks.push((
            addr,
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                resolver.reverse_lookup(addr).await
            }),
        ));
    }

    let mut outcome = LookupOutcome::default();
    for (address, task) in tasks {
        let result = task.await.unwrap_or_else(|_| Err(LookupError::Aborted(address)));
        match result {
            Ok(rec) => outcome.records.push((address, rec)),
            Err(error) => {
                debug!(%address, %error, "reverse lookup failed; skipping");
                outcome.failures.push(LookupFailure { address, error });
            }
        }
    }
    outcome
}

/// Reverse-lookup `addresses` and build the hostname → address mapping.
pub async fn map_hosts(
    addresses: impl IntoIterator<Item = Ipv4Addr>,
    resolver: Arc<dyn ReverseLookup>,
    concurrency: usize,
) -> MappingReport {
    let outcome = lookup_records(addresses, resolver, concurrency).await;
    MappingReport {
        hosts: build_mapping(outcome.records.iter().map(|(_, rec)| rec)),
        failures: outcome.failures,
    }
}
