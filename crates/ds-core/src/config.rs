//! Resolved run configuration and startup validation.
//!
//! A `RunConfig` is the fully-resolved picture of one run: where domains
//! come from, which scanners to drive, which executor is the default, and
//! where cache entries and result tables live. Configuration problems are
//! fatal at startup and map to exit code 1.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

/// Default per-scanner worker count when neither the CLI nor the scanner
/// declares one.
pub const DEFAULT_WORKERS: usize = 10;

/// Hard ceiling on per-scanner parallelism.
pub const GLOBAL_MAX_WORKERS: usize = 1000;

/// Delay before post-run log enrichment, letting the remote side flush its
/// log store.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(20);

/// Errors from run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no scanners selected; pass --scan with at least one scanner name")]
    NoScanners,

    #[error("unknown scanner: {0}")]
    UnknownScanner(String),

    #[error("no domains given; pass --domains with a file path or a domain")]
    NoDomains,

    #[error("remote execution requested but no --lambda-endpoint configured")]
    NoRemoteEndpoint,

    #[error("log enrichment requested but no --logs-endpoint configured")]
    NoLogsEndpoint,

    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Domains(#[from] ds_common::DomainError),
}

/// Fully-resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Domain input: a CSV file path or a literal domain.
    pub domains: String,
    /// Scanner names, in execution order.
    pub scanners: Vec<String>,

    /// Consult the result cache before executing.
    pub cache: bool,
    /// Collect and emit per-attempt meta columns.
    pub meta: bool,
    /// Sort each finished table lexicographically by domain.
    pub sort: bool,
    /// Restrict the domain stream to this suffix.
    pub suffix: Option<String>,

    /// Run-wide default executor: remote when true.
    pub lambda: bool,
    /// Credential profile for the remote clients.
    pub lambda_profile: Option<String>,
    /// Bounded retries per remote invocation.
    pub lambda_retries: u32,
    /// Enrich result tables from the remote log store after the run.
    pub lambda_details: bool,
    /// Invocation endpoint for the remote executor.
    pub lambda_endpoint: Option<String>,
    /// Query endpoint for the remote log store.
    pub logs_endpoint: Option<String>,

    /// Run-wide worker count override.
    pub workers: Option<usize>,
    /// Per-scanner worker count overrides.
    pub scanner_workers: BTreeMap<String, usize>,
    /// Per-scanner remote-executor overrides.
    pub scanner_lambda: BTreeMap<String, bool>,

    pub cache_dir: PathBuf,
    pub results_dir: PathBuf,

    /// Settle delay before post-run enrichment.
    pub settle_delay: Duration,

    /// Scanner-owned options forwarded verbatim from the CLI.
    pub scanner_options: Map<String, Value>,

    /// The invoking command line, recorded in run metadata.
    pub command: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            domains: String::new(),
            scanners: Vec::new(),
            cache: false,
            meta: false,
            sort: false,
            suffix: None,
            lambda: false,
            lambda_profile: None,
            lambda_retries: 0,
            lambda_details: false,
            lambda_endpoint: None,
            logs_endpoint: None,
            workers: None,
            scanner_workers: BTreeMap::new(),
            scanner_lambda: BTreeMap::new(),
            cache_dir: PathBuf::from("./cache"),
            results_dir: PathBuf::from("./results"),
            settle_delay: DEFAULT_SETTLE_DELAY,
            scanner_options: Map::new(),
            command: String::new(),
        }
    }
}

impl RunConfig {
    /// Validate the parts of the configuration that do not need the
    /// scanner registry or the shared clients.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanners.is_empty() {
            return Err(ConfigError::NoScanners);
        }
        if self.domains.trim().is_empty() {
            return Err(ConfigError::NoDomains);
        }
        Ok(())
    }

    /// Whether `scanner` runs on the remote executor this run.
    ///
    /// CLI per-scanner override wins over the scanner's own declaration,
    /// which wins over the run-wide default.
    pub fn scanner_uses_remote(&self, scanner: &str, declared: Option<bool>) -> bool {
        if let Some(&flag) = self.scanner_lambda.get(scanner) {
            return flag;
        }
        declared.unwrap_or(self.lambda)
    }

    /// Worker count for `scanner`, clamped to the global ceiling.
    pub fn worker_count(&self, scanner: &str, scanner_default: Option<usize>) -> usize {
        let requested = self
            .scanner_workers
            .get(scanner)
            .copied()
            .or(self.workers)
            .or(scanner_default)
            .unwrap_or(DEFAULT_WORKERS);
        requested.clamp(1, GLOBAL_MAX_WORKERS)
    }

    /// Options map handed to every scanner hook.
    ///
    /// The scanner-owned bag plus the standard keys scanners expect to see.
    pub fn options(&self) -> Map<String, Value> {
        let mut opts = self.scanner_options.clone();
        opts.insert("scan".into(), Value::String(self.scanners.join(",")));
        opts.insert(
            "cache_dir".into(),
            Value::String(self.cache_dir.to_string_lossy().into_owned()),
        );
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        RunConfig {
            domains: "example.com".into(),
            scanners: vec!["noop".into()],
            ..RunConfig::default()
        }
    }

    #[test]
    fn empty_scanner_list_is_fatal() {
        let cfg = RunConfig {
            scanners: Vec::new(),
            ..base()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NoScanners)));
    }

    #[test]
    fn empty_domains_is_fatal() {
        let cfg = RunConfig {
            domains: "  ".into(),
            ..base()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NoDomains)));
    }

    #[test]
    fn remote_override_precedence() {
        let mut cfg = base();
        cfg.lambda = false;
        assert!(!cfg.scanner_uses_remote("noop", None));
        assert!(cfg.scanner_uses_remote("noop", Some(true)));

        cfg.scanner_lambda.insert("noop".into(), false);
        assert!(!cfg.scanner_uses_remote("noop", Some(true)));
    }

    #[test]
    fn worker_count_clamps_and_prefers_overrides() {
        let mut cfg = base();
        assert_eq!(cfg.worker_count("noop", None), DEFAULT_WORKERS);
        assert_eq!(cfg.worker_count("noop", Some(2)), 2);

        cfg.workers = Some(50);
        assert_eq!(cfg.worker_count("noop", Some(2)), 50);

        cfg.scanner_workers.insert("noop".into(), 4000);
        assert_eq!(cfg.worker_count("noop", Some(2)), GLOBAL_MAX_WORKERS);
    }

    #[test]
    fn options_carry_standard_keys() {
        let cfg = base();
        let opts = cfg.options();
        assert_eq!(opts.get("scan").unwrap(), "noop");
        assert!(opts.contains_key("cache_dir"));
    }
}
