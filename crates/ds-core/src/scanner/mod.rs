//! Scanner module contract and registry.
//!
//! A scanner is a pluggable probe: it examines one domain and returns a
//! JSON payload. The framework requires `name`, `headers`, and `to_rows`;
//! every lifecycle hook is optional and defaults to a no-op. Hooks that
//! mutate the environment return a delta map rather than touching the
//! environment directly, so the driver controls merge and isolation.

pub mod headers;
pub mod noop;
pub mod tls;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ConfigError;
use crate::env::ScanEnv;

/// Options map handed to scanner hooks.
pub type Options = Map<String, Value>;

/// Errors raised by scanner probes.
///
/// Probe failures never fail a run; the per-domain task records them and
/// still emits a row.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("{0}")]
    Probe(String),
}

/// Outcome of an environment-shaping hook.
#[derive(Debug)]
pub enum HookOutcome {
    /// Proceed with no environment changes.
    Unchanged,
    /// Merge these entries into the environment.
    Update(Map<String, Value>),
    /// Decline: `init` aborts the run, `init_domain` skips the domain
    /// silently.
    Refuse,
}

/// A pluggable domain probe.
///
/// Implementations must be shareable across the worker pool; any probe
/// state beyond the environment belongs in interior-immutable fields.
pub trait Scanner: Send + Sync {
    /// Registry name; also names the result table and the remote function.
    fn name(&self) -> &'static str;

    /// Column names for the scanner-owned section of each result row.
    fn headers(&self) -> Vec<String>;

    /// Convert one payload into result rows. Usually one row, can be more.
    fn to_rows(&self, payload: &Value) -> Vec<Vec<Value>>;

    /// One-time setup before any domain of this scanner is processed.
    fn init(&self, _env: &ScanEnv, _options: &Options) -> Result<HookOutcome, ProbeError> {
        Ok(HookOutcome::Unchanged)
    }

    /// Per-domain setup, run against a fork of the scanner environment.
    fn init_domain(
        &self,
        _domain: &str,
        _env: &ScanEnv,
        _options: &Options,
    ) -> Result<HookOutcome, ProbeError> {
        Ok(HookOutcome::Unchanged)
    }

    /// The probe itself. `Value::Null` means "completed, no result".
    fn scan(&self, domain: &str, env: &ScanEnv, options: &Options) -> Result<Value, ProbeError>;

    /// Side-effect hook after a scan; its return value is ignored.
    fn post_scan(&self, _domain: &str, _payload: &Value, _env: &ScanEnv, _options: &Options) {}

    /// One-time teardown after every domain of this scanner completed.
    fn finalize(&self, _env: &ScanEnv, _options: &Options) {}

    /// Scanner-declared worker count, overridable from the CLI.
    fn default_workers(&self) -> Option<usize> {
        None
    }

    /// Scanner-declared executor preference, overridable from the CLI.
    fn use_lambda(&self) -> Option<bool> {
        None
    }

    /// Whether local execution must go through the headless browser bridge.
    fn scan_headless(&self) -> bool {
        false
    }
}

impl fmt::Debug for dyn Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scanner").field(&self.name()).finish()
    }
}

/// Scanner registry keyed by name.
///
/// Built-ins are registered up front; tests and embedders may register
/// additional scanners before a run.
pub struct ScannerRegistry {
    scanners: BTreeMap<&'static str, Arc<dyn Scanner>>,
}

impl ScannerRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        ScannerRegistry {
            scanners: BTreeMap::new(),
        }
    }

    /// The registry of built-in scanners.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(noop::Noop));
        registry.register(Arc::new(headers::Headers::new()));
        registry.register(Arc::new(tls::Tls));
        registry
    }

    /// Register a scanner, replacing any previous one of the same name.
    pub fn register(&mut self, scanner: Arc<dyn Scanner>) {
        self.scanners.insert(scanner.name(), scanner);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scanner>> {
        self.scanners.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scanners.keys().copied().collect()
    }

    /// Resolve a selection of scanner names, preserving order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Scanner>>, ConfigError> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| ConfigError::UnknownScanner(name.clone()))
            })
            .collect()
    }
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
