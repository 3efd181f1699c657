//! Run controller.
//!
//! Owns one end-to-end run: clear prior results, mint the run-wide scan
//! uuid, drive each selected scanner in order (scanners are strictly
//! sequential; only domains within a scanner run in parallel), then
//! optionally enrich the finished tables from the remote log store, and
//! write the run metadata record.

pub mod driver;
pub mod task;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::config::{ConfigError, RunConfig};
use crate::enrich::{enrich_table, LogStore};
use crate::executor::{FunctionInvoker, LocalExecutor};
use crate::output::{
    clear_results, format_timestamp, table_path, write_run_metadata, RunMetadata, ScannerTiming,
    TableError,
};
use crate::scanner::{ProbeError, ScannerRegistry};
use ds_common::ScanUuid;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("scanner {scanner}: init declined, aborting run")]
    InitRefused { scanner: String },

    #[error("scanner {scanner}: init failed: {source}")]
    InitFailed {
        scanner: String,
        #[source]
        source: ProbeError,
    },

    #[error("scanner {scanner} wants the remote executor but none is configured")]
    RemoteUnavailable { scanner: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Shared collaborators for one run.
///
/// One local executor, one invocation client, and one log store client
/// serve every task of the run.
pub struct Clients {
    pub local: LocalExecutor,
    pub invoker: Option<Arc<dyn FunctionInvoker>>,
    pub logs: Option<Arc<dyn LogStore>>,
}

impl Clients {
    /// Local-only collaborators with no remote backends.
    pub fn local_only() -> Self {
        Clients {
            local: LocalExecutor::new(None),
            invoker: None,
            logs: None,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub scan_uuid: ScanUuid,
    pub tables: Vec<PathBuf>,
    pub domains: usize,
    pub duration: f64,
}

/// Execute one full run.
pub fn run(
    config: &RunConfig,
    registry: &ScannerRegistry,
    clients: &Clients,
) -> Result<RunOutcome, DispatchError> {
    config.validate()?;
    let scanners = registry.resolve(&config.scanners)?;
    let domains = ds_common::load_domains(&config.domains, config.suffix.as_deref())
        .map_err(ConfigError::from)?;

    clear_results(&config.results_dir)?;
    let cache = ResultCache::new(&config.cache_dir);
    let scan_uuid = ScanUuid::new();
    let start = Utc::now();
    info!(scan_uuid = %scan_uuid, scanners = scanners.len(), domains = domains.len(), "starting run");

    let mut durations: BTreeMap<String, ScannerTiming> = BTreeMap::new();
    let mut tables = Vec::new();
    let mut any_remote = false;

    for scanner in &scanners {
        let timing = driver::run_scanner(
            scanner.as_ref(),
            &domains,
            config,
            &scan_uuid,
            &cache,
            clients,
        )?;
        any_remote |= config.scanner_uses_remote(scanner.name(), scanner.use_lambda());
        tables.push(table_path(&config.results_dir, scanner.name()));
        durations.insert(scanner.name().to_string(), timing);
    }

    if any_remote && config.lambda_details {
        match &clients.logs {
            Some(logs) => {
                info!(delay = ?config.settle_delay, "letting the remote log store settle");
                thread::sleep(config.settle_delay);
                for table in &tables {
                    if let Err(e) = enrich_table(table, logs.as_ref()) {
                        warn!(table = %table.display(), "enrichment failed: {e}");
                    }
                }
            }
            None => warn!("remote details requested but no log store is configured"),
        }
    }

    let end = Utc::now();
    let duration = (end - start).num_milliseconds() as f64 / 1000.0;
    write_run_metadata(
        &config.results_dir,
        &RunMetadata {
            start_time: format_timestamp(start),
            end_time: format_timestamp(end),
            duration,
            durations,
            command: config.command.clone(),
            scan_uuid: scan_uuid.to_string(),
        },
    )?;
    info!(duration, "run finished");

    Ok(RunOutcome {
        scan_uuid,
        tables,
        domains: domains.len(),
        duration,
    })
}
