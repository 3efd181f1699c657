//! Post-run remote log enrichment.
//!
//! After a remote run, each result table can be augmented with what the
//! remote side's log store recorded about every invocation: the reported
//! duration, the memory actually used, and how far behind the log store
//! lagged the local view. Each row is matched to its log events by request
//! ID; the terminator report line is the last event containing the
//! "Max Memory Used" token, with tab-separated `key: value` fields.
//!
//! Enrichment is best-effort per row: failures land in the row's
//! `Fetching Errors` cell and never fail the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::output::csv::{encode_record, parse_table};
use crate::output::{REMOTE_HEADERS, TIMESTAMP_FORMAT};

/// Columns appended to each enriched table.
pub const ENRICH_HEADERS: &[&str] = &[
    "Reported Duration",
    "Log Delay",
    "Memory Used",
    "Fetching Errors",
];

/// Token that marks the terminator report line of one invocation.
const REPORT_TOKEN: &str = "Max Memory Used";

/// Field positions in the tab-separated report line.
const REPORT_DURATION_FIELD: usize = 1;
const REPORT_MEMORY_FIELD: usize = 4;

/// Errors from log enrichment.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("too many requests")]
    RateLimited,

    #[error("log query failed: {0}")]
    Query(String),

    #[error("enrichment i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One event from the remote log store.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// When the log store ingested the event, in epoch milliseconds.
    pub ingestion_time_ms: i64,
    pub message: String,
}

/// Query interface onto the remote log store.
pub trait LogStore: Send + Sync {
    fn filter_events(
        &self,
        group: &str,
        stream: Option<&str>,
        pattern: &str,
    ) -> Result<Vec<LogEvent>, EnrichError>;
}

/// HTTP-based log store client.
pub struct HttpLogStore {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

const LOG_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

impl HttpLogStore {
    pub fn new(endpoint: &str, profile: Option<&str>) -> Self {
        let client = Client::builder()
            .timeout(LOG_QUERY_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        let token = match profile {
            Some(p) => std::env::var(format!("DS_INVOKE_TOKEN_{}", p.to_ascii_uppercase())).ok(),
            None => std::env::var("DS_INVOKE_TOKEN").ok(),
        };
        HttpLogStore {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "ingestionTime")]
    ingestion_time: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct FilterResponse {
    #[serde(default)]
    events: Vec<WireEvent>,
}

impl LogStore for HttpLogStore {
    fn filter_events(
        &self,
        group: &str,
        stream: Option<&str>,
        pattern: &str,
    ) -> Result<Vec<LogEvent>, EnrichError> {
        let url = format!("{}/filter-log-events", self.endpoint);
        let body = json!({
            "log_group_name": group,
            "log_stream_names": stream.map(|s| vec![s]),
            "filter_pattern": pattern,
        });
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| EnrichError::Query(e.to_string()))?;
        if response.status().as_u16() == 429 {
            return Err(EnrichError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(EnrichError::Query(format!(
                "log endpoint returned status {}",
                response.status()
            )));
        }
        let decoded: FilterResponse = response
            .json()
            .map_err(|e| EnrichError::Query(e.to_string()))?;
        Ok(decoded
            .events
            .into_iter()
            .map(|e| LogEvent {
                ingestion_time_ms: e.ingestion_time,
                message: e.message,
            })
            .collect())
    }
}

/// The four cells appended to one row.
#[derive(Debug, Default, PartialEq)]
struct RowDetails {
    reported_duration: String,
    log_delay: String,
    memory_used: String,
    errors: String,
}

/// Pull the value out of a `key: value` report field.
fn report_value(field: &str) -> String {
    field
        .splitn(2, ':')
        .nth(1)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn details_for_row(
    store: &dyn LogStore,
    request_id: &str,
    group: &str,
    stream: &str,
    end_time: &str,
) -> RowDetails {
    let mut details = RowDetails::default();
    if request_id.is_empty() || group.is_empty() {
        details.errors = "No logs found for this task.".to_string();
        return details;
    }

    let pattern = format!("\"{request_id}\" \"{REPORT_TOKEN}\"");
    let stream = (!stream.is_empty()).then_some(stream);
    let events = match store.filter_events(group, stream, &pattern) {
        Ok(events) => events,
        Err(EnrichError::RateLimited) => {
            details.errors = "too many requests".to_string();
            return details;
        }
        Err(e) => {
            details.errors = e.to_string();
            return details;
        }
    };

    let Some(event) = events.iter().rev().find(|e| e.message.contains(REPORT_TOKEN)) else {
        details.errors = "No logs found for this task.".to_string();
        return details;
    };

    let fields: Vec<&str> = event.message.split('\t').collect();
    if fields.len() > REPORT_MEMORY_FIELD {
        details.reported_duration = report_value(fields[REPORT_DURATION_FIELD]);
        details.memory_used = report_value(fields[REPORT_MEMORY_FIELD]);
    } else {
        details.errors = "malformed report line".to_string();
    }

    match NaiveDateTime::parse_from_str(end_time, TIMESTAMP_FORMAT) {
        Ok(end) => {
            let delay_secs =
                event.ingestion_time_ms as f64 / 1000.0 - end.and_utc().timestamp() as f64;
            details.log_delay = format!("{delay_secs:.3}");
        }
        Err(_) => {
            if details.errors.is_empty() {
                details.errors = format!("unparseable end time: {end_time}");
            }
        }
    }
    details
}

/// Augment one result table in place with remote log details.
///
/// Tables without the remote columns (the scanner ran locally, or meta was
/// off) are left untouched. The rewrite is atomic.
pub fn enrich_table(path: &Path, store: &dyn LogStore) -> Result<(), EnrichError> {
    let io_err = |source| EnrichError::Io {
        path: path.to_path_buf(),
        source,
    };

    let content = fs::read_to_string(path).map_err(io_err)?;
    let mut records = parse_table(&content);
    if records.is_empty() {
        return Ok(());
    }

    let header = &records[0];
    let col = |name: &str| header.iter().position(|h| h == name);
    let (Some(request_id_col), Some(group_col), Some(stream_col), Some(end_col)) = (
        col(REMOTE_HEADERS[0]),
        col(REMOTE_HEADERS[1]),
        col(REMOTE_HEADERS[2]),
        col(REMOTE_HEADERS[4]),
    ) else {
        debug!(path = %path.display(), "table has no remote columns, skipping enrichment");
        return Ok(());
    };

    records[0].extend(ENRICH_HEADERS.iter().map(|h| h.to_string()));
    let width = records[0].len();

    for record in records.iter_mut().skip(1) {
        let cell = |idx: usize| record.get(idx).cloned().unwrap_or_default();
        let details = details_for_row(
            store,
            &cell(request_id_col),
            &cell(group_col),
            &cell(stream_col),
            &cell(end_col),
        );
        record.push(details.reported_duration);
        record.push(details.log_delay);
        record.push(details.memory_used);
        record.push(details.errors);
        record.resize(width, String::new());
    }

    let mut out = String::new();
    for record in &records {
        out.push_str(&encode_record(record));
        out.push('\n');
    }
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, out).map_err(|source| EnrichError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), rows = records.len() - 1, "table enriched with remote log details");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeStore {
        result: Mutex<Vec<Result<Vec<LogEvent>, EnrichError>>>,
        queries: Mutex<Vec<(String, Option<String>, String)>>,
    }

    impl FakeStore {
        fn new(result: Vec<Result<Vec<LogEvent>, EnrichError>>) -> Self {
            FakeStore {
                result: Mutex::new(result),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn report_event(ingestion_time_ms: i64) -> LogEvent {
            LogEvent {
                ingestion_time_ms,
                message: "REPORT RequestId: r-1\tDuration: 402.31 ms\tBilled Duration: 500 ms\tMemory Size: 128 MB\tMax Memory Used: 77 MB".to_string(),
            }
        }
    }

    impl LogStore for FakeStore {
        fn filter_events(
            &self,
            group: &str,
            stream: Option<&str>,
            pattern: &str,
        ) -> Result<Vec<LogEvent>, EnrichError> {
            self.queries.lock().unwrap().push((
                group.to_string(),
                stream.map(|s| s.to_string()),
                pattern.to_string(),
            ));
            self.result.lock().unwrap().remove(0)
        }
    }

    fn table_with_remote_row(dir: &Path, end_time: &str) -> PathBuf {
        let path = dir.join("noop.csv");
        let header = "Domain,Base Domain,OK,Local Errors,Local Start Time,Local End Time,Local Duration,Request ID,Log Group Name,Log Stream Name,Start Time,End Time,Memory Limit,Measured Duration";
        let row = format!(
            "example.com,example.com,True,,2026-08-02 00:00:00,2026-08-02 00:00:01,1.0,r-1,group,stream,2026-08-02 00:00:00,{end_time},128,0.4"
        );
        fs::write(&path, format!("{header}\n{row}\n")).unwrap();
        path
    }

    #[test]
    fn enrichment_appends_details_columns() {
        let dir = tempfile::TempDir::new().unwrap();
        // Ingestion lands 2.5s after the row's end time.
        let end_epoch_ms = chrono::NaiveDateTime::parse_from_str("2026-08-02 00:00:01", TIMESTAMP_FORMAT)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        let store = FakeStore::new(vec![Ok(vec![FakeStore::report_event(end_epoch_ms + 2500)])]);

        let path = table_with_remote_row(dir.path(), "2026-08-02 00:00:01");
        enrich_table(&path, &store).unwrap();

        let records = parse_table(&fs::read_to_string(&path).unwrap());
        let header = &records[0];
        assert_eq!(&header[header.len() - 4..], ENRICH_HEADERS);

        let row = &records[1];
        assert_eq!(row.len(), header.len());
        assert_eq!(row[header.len() - 4], "402.31 ms");
        assert_eq!(row[header.len() - 3], "2.500");
        assert_eq!(row[header.len() - 2], "77 MB");
        assert_eq!(row[header.len() - 1], "");

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries[0].0, "group");
        assert_eq!(queries[0].1.as_deref(), Some("stream"));
        assert!(queries[0].2.contains("\"r-1\""));
        assert!(queries[0].2.contains(REPORT_TOKEN));
    }

    #[test]
    fn rate_limit_is_recorded_per_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FakeStore::new(vec![Err(EnrichError::RateLimited)]);
        let path = table_with_remote_row(dir.path(), "2026-08-02 00:00:01");
        enrich_table(&path, &store).unwrap();

        let records = parse_table(&fs::read_to_string(&path).unwrap());
        assert_eq!(records[1].last().unwrap(), "too many requests");
    }

    #[test]
    fn missing_events_are_recorded_per_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FakeStore::new(vec![Ok(Vec::new())]);
        let path = table_with_remote_row(dir.path(), "2026-08-02 00:00:01");
        enrich_table(&path, &store).unwrap();

        let records = parse_table(&fs::read_to_string(&path).unwrap());
        assert_eq!(records[1].last().unwrap(), "No logs found for this task.");
    }

    #[test]
    fn local_only_tables_are_left_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("noop.csv");
        let original = "Domain,Base Domain,OK\nexample.com,example.com,True\n";
        fs::write(&path, original).unwrap();

        let store = FakeStore::new(Vec::new());
        enrich_table(&path, &store).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert!(store.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn rows_without_request_id_do_not_query() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("noop.csv");
        let header = "Domain,Base Domain,OK,Request ID,Log Group Name,Log Stream Name,End Time";
        fs::write(&path, format!("{header}\nexample.com,example.com,True,,,,\n")).unwrap();

        let store = FakeStore::new(Vec::new());
        enrich_table(&path, &store).unwrap();

        let records = parse_table(&fs::read_to_string(&path).unwrap());
        assert_eq!(records[1].last().unwrap(), "No logs found for this task.");
        assert!(store.queries.lock().unwrap().is_empty());
    }
}
