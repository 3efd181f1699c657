//! Per-scanner lifecycle.
//!
//! For one scanner: compose the base environment, run `init` (a refusal or
//! failure aborts the whole run), open the result table, fan the domain
//! stream out over a bounded worker pool, run `finalize`, and record the
//! scanner's wall-clock bracket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use chrono::Utc;
use tracing::{debug, info};

use crate::cache::ResultCache;
use crate::config::RunConfig;
use crate::dispatch::task::{scan_domain, TaskContext};
use crate::dispatch::{Clients, DispatchError};
use crate::env::{ScanEnv, ScanMethod};
use crate::executor::RemoteExecutor;
use crate::output::{format_timestamp, ResultTable, ScannerTiming};
use crate::scanner::{HookOutcome, Scanner};
use ds_common::ScanUuid;

/// Drive one scanner over the domain stream.
pub fn run_scanner(
    scanner: &dyn Scanner,
    domains: &[String],
    config: &RunConfig,
    scan_uuid: &ScanUuid,
    cache: &ResultCache,
    clients: &Clients,
) -> Result<ScannerTiming, DispatchError> {
    let name = scanner.name();
    let use_remote = config.scanner_uses_remote(name, scanner.use_lambda());
    let workers = config.worker_count(name, scanner.default_workers());
    let method = if use_remote {
        ScanMethod::Remote
    } else {
        ScanMethod::Local
    };
    info!(scanner = name, method = %method, workers, domains = domains.len(), "starting scanner");

    let start = Utc::now();
    let options = config.options();
    let mut env = ScanEnv::new(method, scan_uuid.clone(), workers);

    match scanner.init(&env, &options) {
        Ok(HookOutcome::Update(delta)) => env.merge(delta),
        Ok(HookOutcome::Unchanged) => {}
        Ok(HookOutcome::Refuse) => {
            return Err(DispatchError::InitRefused {
                scanner: name.to_string(),
            })
        }
        Err(source) => {
            return Err(DispatchError::InitFailed {
                scanner: name.to_string(),
                source,
            })
        }
    }

    let remote = if use_remote {
        let invoker = clients
            .invoker
            .clone()
            .ok_or_else(|| DispatchError::RemoteUnavailable {
                scanner: name.to_string(),
            })?;
        Some(RemoteExecutor::new(invoker, config.lambda_retries))
    } else {
        None
    };

    let table = ResultTable::create(
        &config.results_dir,
        name,
        &scanner.headers(),
        config.meta,
        use_remote,
        config.sort,
    )?;

    let ctx = TaskContext {
        scanner,
        env: &env,
        options: &options,
        cache,
        table: &table,
        local: &clients.local,
        remote: remote.as_ref(),
        cache_enabled: config.cache,
        meta_enabled: config.meta,
    };

    if !domains.is_empty() {
        let next = AtomicUsize::new(0);
        let pool_size = workers.min(domains.len());
        thread::scope(|scope| {
            for _ in 0..pool_size {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(domain) = domains.get(i) else { break };
                    scan_domain(&ctx, domain);
                });
            }
        });
    }

    scanner.finalize(&env, &options);
    table.close()?;

    let end = Utc::now();
    let duration = (end - start).num_milliseconds() as f64 / 1000.0;
    debug!(scanner = name, duration, "scanner finished");
    Ok(ScannerTiming {
        start_time: format_timestamp(start),
        end_time: format_timestamp(end),
        duration,
    })
}
