//! Result tables and run metadata.
//!
//! Each scanner gets one CSV table in the results directory, opened at run
//! start with a fixed header row and appended to by that scanner's domain
//! tasks. The header layout is always `[Domain, Base Domain]`, then the
//! scanner's own columns, then (when meta collection is on) the local
//! timing columns, then (when the scanner ran remotely) the remote
//! execution columns.
//!
//! Appends are serialized per table; tables are independent. Closing a
//! table optionally sorts its rows by the Domain column with an atomic
//! rewrite.

pub mod csv;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Framework columns preceding every scanner's own columns.
pub const PREFIX_HEADERS: &[&str] = &["Domain", "Base Domain"];

/// Local timing columns, present when meta collection is enabled.
pub const LOCAL_HEADERS: &[&str] = &[
    "Local Errors",
    "Local Start Time",
    "Local End Time",
    "Local Duration",
];

/// Remote execution columns, present when meta collection is enabled and
/// the scanner ran on the remote executor.
pub const REMOTE_HEADERS: &[&str] = &[
    "Request ID",
    "Log Group Name",
    "Log Stream Name",
    "Start Time",
    "End Time",
    "Memory Limit",
    "Measured Duration",
];

/// Timestamp format used in table cells and run metadata.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors from result table operations.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write run metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TableError + '_ {
    move |source| TableError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Render one JSON value as a table cell.
///
/// Booleans render `True`/`False`, null renders empty, numbers and strings
/// render bare, arrays and objects render as compact JSON.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format a timestamp for table cells and run metadata.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Path of a scanner's result table.
pub fn table_path(results_dir: &Path, scanner: &str) -> PathBuf {
    results_dir.join(format!("{scanner}.csv"))
}

/// Remove prior result tables and run metadata.
pub fn clear_results(results_dir: &Path) -> Result<(), TableError> {
    let entries = match fs::read_dir(results_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(TableError::Io {
                path: results_dir.to_path_buf(),
                source,
            })
        }
    };
    for entry in entries {
        let entry = entry.map_err(io_err(results_dir))?;
        let path = entry.path();
        let is_table = path.extension().is_some_and(|ext| ext == "csv");
        let is_meta = path.file_name().is_some_and(|name| name == "meta.json");
        if is_table || is_meta {
            debug!(path = %path.display(), "clearing prior result");
            fs::remove_file(&path).map_err(io_err(&path))?;
        }
    }
    Ok(())
}

/// Append-only CSV table for one scanner.
pub struct ResultTable {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    columns: usize,
    sort: bool,
}

impl ResultTable {
    /// Open the table and write its header row.
    pub fn create(
        results_dir: &Path,
        scanner: &str,
        scanner_headers: &[String],
        meta: bool,
        remote: bool,
        sort: bool,
    ) -> Result<Self, TableError> {
        fs::create_dir_all(results_dir).map_err(io_err(results_dir))?;
        let path = table_path(results_dir, scanner);

        let mut header: Vec<String> = PREFIX_HEADERS.iter().map(|h| h.to_string()).collect();
        header.extend(scanner_headers.iter().cloned());
        if meta {
            header.extend(LOCAL_HEADERS.iter().map(|h| h.to_string()));
            if remote {
                header.extend(REMOTE_HEADERS.iter().map(|h| h.to_string()));
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", csv::encode_record(&header)).map_err(io_err(&path))?;

        Ok(ResultTable {
            columns: header.len(),
            path,
            writer: Mutex::new(writer),
            sort,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total column count, framework columns included.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Append one row, padded or truncated to the header width.
    pub fn append(&self, mut cells: Vec<String>) -> Result<(), TableError> {
        cells.resize(self.columns, String::new());
        let line = csv::encode_record(&cells);
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{line}").map_err(io_err(&self.path))?;
        writer.flush().map_err(io_err(&self.path))
    }

    /// Flush and close the table; sort rows by domain when requested.
    pub fn close(self) -> Result<PathBuf, TableError> {
        {
            let mut writer = self.writer.lock().unwrap();
            writer.flush().map_err(io_err(&self.path))?;
        }
        drop(self.writer);

        if self.sort {
            sort_table(&self.path)?;
        }
        Ok(self.path)
    }
}

/// Sort a table's data rows lexicographically by the first column.
///
/// Rewrites through a temp file and rename so a crash never leaves a
/// half-written table.
fn sort_table(path: &Path) -> Result<(), TableError> {
    let content = fs::read_to_string(path).map_err(io_err(path))?;
    let mut records = csv::parse_table(&content);
    if records.len() <= 2 {
        return Ok(());
    }
    let header = records.remove(0);
    records.sort_by(|a, b| a.first().cmp(&b.first()));

    let mut out = String::new();
    out.push_str(&csv::encode_record(&header));
    out.push('\n');
    for record in &records {
        out.push_str(&csv::encode_record(record));
        out.push('\n');
    }

    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, out).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}

/// Per-scanner timing in the run metadata record.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerTiming {
    pub start_time: String,
    pub end_time: String,
    pub duration: f64,
}

/// The `meta.json` record written at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub start_time: String,
    pub end_time: String,
    pub duration: f64,
    pub durations: std::collections::BTreeMap<String, ScannerTiming>,
    pub command: String,
    pub scan_uuid: String,
}

/// Write `meta.json` into the results directory.
pub fn write_run_metadata(results_dir: &Path, metadata: &RunMetadata) -> Result<(), TableError> {
    let path = results_dir.join("meta.json");
    let encoded = serde_json::to_string_pretty(metadata)?;
    fs::write(&path, encoded).map_err(io_err(&path))
}
