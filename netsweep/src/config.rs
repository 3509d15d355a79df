use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::output::OutputFormat;

pub const DEFAULT_CONFIG: &str = "netsweep.yaml";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// ICMP echo via the system ping utility
    #[default]
    Ping,
    /// TCP connect to the probe ports
    Tcp,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct SweepConfig {
    pub pool_size: Option<usize>,
    pub probe: Option<ProbeKind>,
    pub ports: Option<String>,
    pub timeout_ms: Option<u64>,
    pub anchor: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct LookupConfig {
    pub dns_server: Option<String>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct OutputConfig {
    pub format: Option<OutputFormat>,
    pub records: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub sweep: Option<SweepConfig>,
    pub lookup: Option<LookupConfig>,
    pub output: Option<OutputConfig>,
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(s)?)
}

/// Load `path`, or `./netsweep.yaml` when no path is given.
///
/// An explicit path must exist and parse; a broken implicit file is only warned about.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    if let Some(p) = path {
        let s = fs::read_to_string(p).with_context(|| format!("reading config {}", p.display()))?;
        let cfg = parse_config(&s).with_context(|| format!("parsing config {}", p.display()))?;
        return Ok(Some(cfg));
    }
    let p = Path::new(DEFAULT_CONFIG);
    if !p.exists() {
        return Ok(None);
    }
    let loaded = fs::read_to_string(p)
        .map_err(anyhow::Error::from)
        .and_then(|s| parse_config(&s));
    match loaded {
        Ok(cfg) => Ok(Some(cfg)),
        Err(e) => {
            warn!(path = DEFAULT_CONFIG, error = %e, "ignoring unreadable config");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = parse_config(
            r#"
sweep:
  pool_size: 64
  probe: tcp
  ports: "22,80"
  timeout_ms: 800
lookup:
  dns_server: "192.168.1.1:53"
  concurrency: 8
output:
  format: jsonl
  records: true
"#,
        )
        .unwrap();
        let sweep = cfg.sweep.unwrap();
        assert_eq!(sweep.pool_size, Some(64));
        assert_eq!(sweep.probe, Some(ProbeKind::Tcp));
        assert_eq!(sweep.ports.as_deref(), Some("22,80"));
        let lookup = cfg.lookup.unwrap();
        assert_eq!(lookup.dns_server.as_deref(), Some("192.168.1.1:53"));
        assert_eq!(lookup.timeout_ms, None);
        let output = cfg.output.unwrap();
        assert_eq!(output.format, Some(OutputFormat::Jsonl));
        assert_eq!(output.records, Some(true));
    }

    #[test]
    fn empty_sections_are_fine() {
        let cfg = parse_config("sweep: {}\n").unwrap();
        assert_eq!(cfg.sweep, Some(SweepConfig::default()));
        assert!(cfg.lookup.is_none());
    }

    #[test]
    fn unknown_probe_kind_is_an_error() {
        assert!(parse_config("sweep:\n  probe: arp\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/netsweep.yaml"))).is_err());
    }
}
