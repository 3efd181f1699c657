//! Per-domain task.
//!
//! One task drives one (scanner, domain) pair end to end: fork the
//! environment, run `init_domain`, consult the cache, execute the probe on
//! the chosen backend, run `post_scan`, persist the payload, and emit
//! result rows. Failures at any step are recorded in the task's meta and
//! the task still emits a row; only an `init_domain` refusal ends a task
//! silently with no row.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::cache::{CacheEntry, ResultCache};
use crate::env::{ScanEnv, ScanMethod};
use crate::executor::{LocalExecutor, RemoteExecutor, RemoteMeta};
use crate::output::{cell, format_timestamp, ResultTable};
use crate::scanner::{HookOutcome, Options, Scanner};

/// Message recorded when a scan completes without data.
const NOTHING_RETURNED: &str = "Scan returned nothing.";

/// Per-attempt diagnostic record.
#[derive(Debug, Default)]
pub struct TaskMeta {
    pub errors: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock executor time in seconds.
    pub duration: Option<f64>,
    pub lambda: Option<RemoteMeta>,
}

impl TaskMeta {
    /// The local timing cells, in `LOCAL_HEADERS` order.
    pub fn local_cells(&self) -> Vec<String> {
        vec![
            self.errors.join("; "),
            self.start_time.map(format_timestamp).unwrap_or_default(),
            self.end_time.map(format_timestamp).unwrap_or_default(),
            self.duration.map(|d| format!("{d:.3}")).unwrap_or_default(),
        ]
    }

    /// The remote execution cells, in `REMOTE_HEADERS` order.
    pub fn remote_cells(&self) -> Vec<String> {
        let lambda = self.lambda.clone().unwrap_or_default();
        let opt = |v: Option<String>| v.unwrap_or_default();
        let val = |v: Option<Value>| v.as_ref().map(cell).unwrap_or_default();
        vec![
            opt(lambda.request_id),
            opt(lambda.log_group_name),
            opt(lambda.log_stream_name),
            opt(lambda.start_time),
            opt(lambda.end_time),
            val(lambda.memory_limit),
            val(lambda.measured_duration),
        ]
    }
}

/// Everything a domain task borrows from its scanner's lifecycle.
pub struct TaskContext<'a> {
    pub scanner: &'a dyn Scanner,
    /// Scanner environment after `init`; forked per domain.
    pub env: &'a ScanEnv,
    pub options: &'a Options,
    pub cache: &'a ResultCache,
    pub table: &'a ResultTable,
    pub local: &'a LocalExecutor,
    pub remote: Option<&'a RemoteExecutor>,
    /// Consult the cache before executing.
    pub cache_enabled: bool,
    /// Emit meta columns with each row.
    pub meta_enabled: bool,
}

/// Run one (scanner, domain) task to completion.
pub fn scan_domain(ctx: &TaskContext<'_>, domain: &str) {
    let scanner = ctx.scanner.name();
    let mut meta = TaskMeta::default();
    let mut env = ctx.env.clone();

    // Per-domain environment setup. A refusal skips the domain silently.
    match ctx.scanner.init_domain(domain, &env, ctx.options) {
        Ok(HookOutcome::Refuse) => {
            debug!(scanner, domain, "init_domain declined, skipping domain");
            return;
        }
        Ok(HookOutcome::Update(delta)) => env.merge(delta),
        Ok(HookOutcome::Unchanged) => {}
        Err(e) => {
            meta.errors.push(format!("init_domain failed: {e}"));
            emit(ctx, domain, &Value::Null, &meta);
            return;
        }
    }

    let mut payload = Value::Null;
    let mut cache_hit = false;

    if ctx.cache_enabled {
        match ctx.cache.read(scanner, domain) {
            Ok(CacheEntry::Payload(value)) => {
                payload = value;
                cache_hit = true;
            }
            Ok(CacheEntry::Invalid) => {
                // A completed-but-empty attempt: emit an empty row without
                // re-executing.
                cache_hit = true;
            }
            Ok(CacheEntry::Absent) => {}
            Err(e) => {
                meta.errors.push(format!("cache read failed: {e}"));
            }
        }
    }

    if !cache_hit {
        meta.start_time = Some(Utc::now());
        env.clear_fast_cache();
        match env.scan_method {
            ScanMethod::Remote => match ctx.remote {
                Some(remote) => {
                    let outcome = remote.execute(scanner, domain, &env, ctx.options);
                    meta.errors.extend(outcome.errors);
                    meta.lambda = Some(outcome.meta);
                    payload = outcome.data;
                }
                None => {
                    meta.errors.push("remote executor unavailable".to_string());
                }
            },
            ScanMethod::Local => match ctx.local.execute(ctx.scanner, domain, &env, ctx.options) {
                Ok(value) => payload = value,
                Err(e) => meta.errors.push(e.to_string()),
            },
        }
        let end = Utc::now();
        if let Some(start) = meta.start_time {
            meta.duration = Some((end - start).num_milliseconds() as f64 / 1000.0);
        }
        meta.end_time = Some(end);
    }

    ctx.scanner.post_scan(domain, &payload, &env, ctx.options);

    if !cache_hit {
        let entry = (!payload.is_null()).then_some(&payload);
        if entry.is_none() {
            meta.errors.push(NOTHING_RETURNED.to_string());
        }
        if let Err(e) = ctx.cache.write(scanner, domain, entry) {
            meta.errors.push(format!("cache write failed: {e}"));
        }
    }

    emit(ctx, domain, &payload, &meta);
}

/// Convert the payload to rows and append them to the scanner's table.
fn emit(ctx: &TaskContext<'_>, domain: &str, payload: &Value, meta: &TaskMeta) {
    let scanner = ctx.scanner.name();
    for e in &meta.errors {
        warn!(scanner, domain, "{e}");
    }

    let rows = if payload.is_null() {
        Vec::new()
    } else {
        ctx.scanner.to_rows(payload)
    };

    let mut meta_cells = Vec::new();
    if ctx.meta_enabled {
        meta_cells.extend(meta.local_cells());
        if ctx.env.scan_method == ScanMethod::Remote {
            meta_cells.extend(meta.remote_cells());
        }
    }

    let scanner_width = ctx.scanner.headers().len();
    let prefix = [
        domain.to_string(),
        ds_common::base_domain(domain),
    ];

    let emit_one = |scanner_cells: Vec<String>| {
        let mut record: Vec<String> = prefix.to_vec();
        let mut cells = scanner_cells;
        cells.resize(scanner_width, String::new());
        record.extend(cells);
        record.extend(meta_cells.iter().cloned());
        if let Err(e) = ctx.table.append(record) {
            error!(scanner, domain, "failed to emit row: {e}");
        }
    };

    if rows.is_empty() {
        // Null payload or row-less conversion still yields one row so the
        // domain shows up in the table.
        emit_one(Vec::new());
    } else {
        for row in rows {
            emit_one(row.iter().map(cell).collect());
        }
    }
}
