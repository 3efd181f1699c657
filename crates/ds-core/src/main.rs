//! Domain scan dispatcher CLI.
//!
//! Runs every given domain through every selected scanner, locally or on
//! serverless workers, and writes one CSV result table per scanner plus a
//! run metadata record.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::{Map, Value};
use tracing::error;

use ds_core::config::{ConfigError, RunConfig};
use ds_core::dispatch::{self, Clients, DispatchError};
use ds_core::enrich::{HttpLogStore, LogStore};
use ds_core::executor::{
    CommandBridge, FunctionInvoker, HeadlessBridge, HttpFunctionInvoker, LocalExecutor,
};
use ds_core::exit_codes::ExitCode;
use ds_core::logging::init_logging;
use ds_core::scanner::ScannerRegistry;

/// Scan a set of domains with a set of pluggable scanners.
#[derive(Parser, Debug)]
#[command(name = "ds-core")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Domains to scan: a CSV file path (first column) or a literal domain
    #[arg(long)]
    domains: Option<String>,

    /// Comma-separated scanner names, in execution order
    #[arg(long)]
    scan: Option<String>,

    /// Consult the result cache before executing a probe
    #[arg(long)]
    cache: bool,

    /// Collect per-attempt timings and errors into the result tables
    #[arg(long)]
    meta: bool,

    /// Sort each finished table by the Domain column
    #[arg(long)]
    sort: bool,

    /// Restrict the domain stream to this suffix (e.g. .gov)
    #[arg(long)]
    suffix: Option<String>,

    /// Execute probes on the remote serverless workers by default
    #[arg(long)]
    lambda: bool,

    /// Credential profile for the remote clients
    #[arg(long)]
    lambda_profile: Option<String>,

    /// Bounded retries per remote invocation
    #[arg(long, default_value_t = 0)]
    lambda_retries: u32,

    /// After the run, enrich result tables from the remote log store
    #[arg(long)]
    lambda_details: bool,

    /// Invocation endpoint for the remote executor
    #[arg(long, env = "DS_LAMBDA_ENDPOINT")]
    lambda_endpoint: Option<String>,

    /// Query endpoint for the remote log store
    #[arg(long, env = "DS_LOGS_ENDPOINT")]
    logs_endpoint: Option<String>,

    /// Run-wide worker count per scanner
    #[arg(long)]
    workers: Option<usize>,

    /// Per-scanner worker override, e.g. --scanner-workers tls=50
    #[arg(long, value_name = "NAME=N")]
    scanner_workers: Vec<String>,

    /// Per-scanner executor override, e.g. --scanner-lambda headers=true
    #[arg(long, value_name = "NAME=BOOL")]
    scanner_lambda: Vec<String>,

    /// Result cache directory
    #[arg(long, default_value = "./cache")]
    cache_dir: PathBuf,

    /// Result table directory
    #[arg(long, default_value = "./results")]
    results_dir: PathBuf,

    /// Headless browser bridge program for browser-backed scanners
    #[arg(long)]
    headless_bridge: Option<PathBuf>,

    /// Scanner-owned option, e.g. --scanner-opt noop_delay=2
    #[arg(long, value_name = "KEY=VALUE")]
    scanner_opt: Vec<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

/// Split repeated `key=value` flags into pairs.
fn split_pairs(flags: &[String]) -> impl Iterator<Item = (String, &str)> + '_ {
    flags.iter().filter_map(|flag| {
        flag.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim()))
    })
}

/// Scanner option values are JSON when they parse as JSON, strings
/// otherwise, so `--scanner-opt noop_delay=2` arrives as a number.
fn option_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_config(cli: &Cli) -> RunConfig {
    let scanners = cli
        .scan
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let mut scanner_workers = BTreeMap::new();
    for (name, value) in split_pairs(&cli.scanner_workers) {
        if let Ok(n) = value.parse::<usize>() {
            scanner_workers.insert(name, n);
        }
    }
    let mut scanner_lambda = BTreeMap::new();
    for (name, value) in split_pairs(&cli.scanner_lambda) {
        if let Ok(flag) = value.parse::<bool>() {
            scanner_lambda.insert(name, flag);
        }
    }
    let mut scanner_options = Map::new();
    for (key, value) in split_pairs(&cli.scanner_opt) {
        scanner_options.insert(key, option_value(value));
    }

    RunConfig {
        domains: cli.domains.clone().unwrap_or_default(),
        scanners,
        cache: cli.cache,
        meta: cli.meta,
        sort: cli.sort,
        suffix: cli.suffix.clone(),
        lambda: cli.lambda,
        lambda_profile: cli.lambda_profile.clone(),
        lambda_retries: cli.lambda_retries,
        lambda_details: cli.lambda_details,
        lambda_endpoint: cli.lambda_endpoint.clone(),
        logs_endpoint: cli.logs_endpoint.clone(),
        workers: cli.workers,
        scanner_workers,
        scanner_lambda,
        cache_dir: cli.cache_dir.clone(),
        results_dir: cli.results_dir.clone(),
        scanner_options,
        command: std::env::args().collect::<Vec<_>>().join(" "),
        ..RunConfig::default()
    }
}

/// Build the shared clients, checking that every requested remote concern
/// has an endpoint.
fn build_clients(config: &RunConfig, cli: &Cli) -> Result<Clients, ConfigError> {
    let profile = config.lambda_profile.as_deref();

    let remote_requested = config.lambda || config.scanner_lambda.values().any(|&v| v);
    let invoker: Option<Arc<dyn FunctionInvoker>> = match config.lambda_endpoint.as_deref() {
        Some(endpoint) => Some(Arc::new(HttpFunctionInvoker::new(endpoint, profile))),
        None if remote_requested => return Err(ConfigError::NoRemoteEndpoint),
        None => None,
    };

    let logs: Option<Arc<dyn LogStore>> = match config.logs_endpoint.as_deref() {
        Some(endpoint) => Some(Arc::new(HttpLogStore::new(endpoint, profile))),
        None if config.lambda_details => return Err(ConfigError::NoLogsEndpoint),
        None => None,
    };

    let headless: Option<Arc<dyn HeadlessBridge>> = cli
        .headless_bridge
        .as_ref()
        .map(|program| Arc::new(CommandBridge::new(program.clone(), Vec::new())) as Arc<dyn HeadlessBridge>);

    Ok(Clients {
        local: LocalExecutor::new(headless),
        invoker,
        logs,
    })
}

fn prepare_directories(config: &RunConfig) -> Result<(), ConfigError> {
    for dir in [&config.cache_dir, &config.results_dir] {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Directory {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

fn real_main(cli: Cli) -> Result<(), DispatchError> {
    let config = build_config(&cli);
    config.validate()?;
    prepare_directories(&config)?;

    let registry = ScannerRegistry::builtin();
    let clients = build_clients(&config, &cli)?;
    dispatch::run(&config, &registry, &clients)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let code = match real_main(cli) {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            error!("{e}");
            ExitCode::Failure
        }
    };
    std::process::exit(code.as_i32());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("ds-core").chain(args.iter().copied()))
    }

    #[test]
    fn scan_list_is_split_and_ordered() {
        let config = build_config(&cli(&["--domains", "example.com", "--scan", "tls, noop"]));
        assert_eq!(config.scanners, vec!["tls", "noop"]);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = build_config(&cli(&[
            "--domains",
            "example.com",
            "--scan",
            "noop",
            "--scanner-workers",
            "noop=7",
            "--scanner-lambda",
            "noop=true",
            "--scanner-opt",
            "noop_delay=2",
            "--scanner-opt",
            "label=fast",
        ]));
        assert_eq!(config.scanner_workers.get("noop"), Some(&7));
        assert_eq!(config.scanner_lambda.get("noop"), Some(&true));
        assert_eq!(config.scanner_options.get("noop_delay"), Some(&Value::from(2)));
        assert_eq!(config.scanner_options.get("label"), Some(&Value::from("fast")));
    }

    #[test]
    fn remote_default_without_endpoint_is_a_config_error() {
        let parsed = cli(&["--domains", "example.com", "--scan", "noop", "--lambda"]);
        let config = build_config(&parsed);
        assert!(matches!(
            build_clients(&config, &parsed),
            Err(ConfigError::NoRemoteEndpoint)
        ));
    }

    #[test]
    fn details_without_logs_endpoint_is_a_config_error() {
        let parsed = cli(&["--domains", "example.com", "--scan", "noop", "--lambda-details"]);
        let config = build_config(&parsed);
        assert!(matches!(
            build_clients(&config, &parsed),
            Err(ConfigError::NoLogsEndpoint)
        ));
    }
}
