//! On-disk result cache.
//!
//! One JSON file per (scanner, domain) at `<cache_dir>/<scanner>/<domain>.json`.
//! A file holds either the scan payload or the sentinel `{"invalid": true}`,
//! which records a completed scan that returned nothing. Presence implies
//! completeness; entries are never deleted by the dispatcher.
//!
//! Writes go through a temp file and rename so readers never observe a
//! partial entry.

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed cache entry at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What a cache read produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// A completed scan with data.
    Payload(Value),
    /// A completed scan that returned nothing.
    Invalid,
    /// No entry on disk.
    Absent,
}

/// Content-addressed store of scan payloads keyed by (scanner, domain).
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
}

impl ResultCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ResultCache { root: root.into() }
    }

    /// Path of the entry for (scanner, domain).
    pub fn entry_path(&self, scanner: &str, domain: &str) -> PathBuf {
        self.root.join(scanner).join(format!("{domain}.json"))
    }

    /// Read the entry for (scanner, domain).
    pub fn read(&self, scanner: &str, domain: &str) -> Result<CacheEntry, CacheError> {
        let path = self.entry_path(scanner, domain);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheEntry::Absent),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let value: Value =
            serde_json::from_str(&raw).map_err(|source| CacheError::Malformed {
                path: path.clone(),
                source,
            })?;
        if value.get("invalid").and_then(Value::as_bool) == Some(true) {
            debug!(scanner, domain, "cache hit (invalid sentinel)");
            return Ok(CacheEntry::Invalid);
        }
        debug!(scanner, domain, "cache hit");
        Ok(CacheEntry::Payload(value))
    }

    /// Write the entry for (scanner, domain); `None` writes the sentinel.
    ///
    /// The replace is atomic: content lands in a sibling temp file first.
    pub fn write(
        &self,
        scanner: &str,
        domain: &str,
        payload: Option<&Value>,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(scanner, domain);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let value = match payload {
            Some(v) => v.clone(),
            None => json!({ "invalid": true }),
        };
        let encoded = serde_json::to_string(&value).map_err(|source| CacheError::Malformed {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, encoded).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CacheError::Io { path, source })
    }
}
