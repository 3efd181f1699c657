//! Per-scanner scan environment.
//!
//! The environment carries the typed facts every scanner sees
//! (`scan_method`, `scan_uuid`, `workers`) plus an extension bag of JSON
//! values that `init` and `init_domain` hooks contribute. One reserved
//! entry, the fast cache, holds a large shared lookup table: it is aliased
//! (never deep-copied) into per-domain environments and never serialized
//! into remote envelopes.

use std::fmt;
use std::sync::Arc;

use ds_common::ScanUuid;
use serde_json::{json, Map, Value};

/// Reserved extension-bag key for the shared in-memory lookup table.
pub const FAST_CACHE_KEY: &str = "fast_cache";

/// Where a scanner's probes execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMethod {
    Local,
    Remote,
}

impl ScanMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanMethod::Local => "local",
            ScanMethod::Remote => "remote",
        }
    }
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment for one scanner, forked per domain.
///
/// `Clone` deep-copies the extension bag but only bumps the refcount on the
/// fast cache, so per-domain forks stay cheap and isolated while sharing
/// the big read-only table.
#[derive(Debug, Clone)]
pub struct ScanEnv {
    pub scan_method: ScanMethod,
    pub scan_uuid: ScanUuid,
    pub workers: usize,
    extra: Map<String, Value>,
    fast_cache: Option<Arc<Value>>,
}

impl ScanEnv {
    pub fn new(scan_method: ScanMethod, scan_uuid: ScanUuid, workers: usize) -> Self {
        ScanEnv {
            scan_method,
            scan_uuid,
            workers,
            extra: Map::new(),
            fast_cache: None,
        }
    }

    /// Merge a hook's environment delta.
    ///
    /// The reserved fast-cache entry is routed into the aliased slot; all
    /// other keys land in the extension bag, last write winning.
    pub fn merge(&mut self, delta: Map<String, Value>) {
        for (key, value) in delta {
            if key == FAST_CACHE_KEY {
                self.fast_cache = Some(Arc::new(value));
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// Look up an extension-bag entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn fast_cache(&self) -> Option<&Arc<Value>> {
        self.fast_cache.as_ref()
    }

    pub fn set_fast_cache(&mut self, table: Arc<Value>) {
        self.fast_cache = Some(table);
    }

    /// Drop the fast-cache alias.
    ///
    /// The table serves the local hooks (`init`, `init_domain`); probes
    /// never see it, on either executor.
    pub fn clear_fast_cache(&mut self) {
        self.fast_cache = None;
    }

    /// The environment as sent to the remote executor.
    ///
    /// Typed fields plus the extension bag; the fast cache is excluded by
    /// construction.
    pub fn remote_envelope(&self) -> Value {
        let mut env = Map::new();
        env.insert("scan_method".into(), json!(self.scan_method.as_str()));
        env.insert("scan_uuid".into(), json!(self.scan_uuid.as_str()));
        env.insert("workers".into(), json!(self.workers));
        for (k, v) in &self.extra {
            env.insert(k.clone(), v.clone());
        }
        Value::Object(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ScanEnv {
        ScanEnv::new(ScanMethod::Local, ScanUuid::new(), 2)
    }

    #[test]
    fn merge_routes_fast_cache_out_of_the_bag() {
        let mut e = env();
        let mut delta = Map::new();
        delta.insert("constant".into(), json!(12345));
        delta.insert(FAST_CACHE_KEY.into(), json!({"example.com": true}));
        e.merge(delta);

        assert_eq!(e.get("constant"), Some(&json!(12345)));
        assert!(e.get(FAST_CACHE_KEY).is_none());
        assert!(e.fast_cache().is_some());
    }

    #[test]
    fn fork_aliases_fast_cache_and_isolates_bag() {
        let mut parent = env();
        parent.set_fast_cache(Arc::new(json!({"big": "table"})));

        let mut child = parent.clone();
        let mut delta = Map::new();
        delta.insert("variable".into(), json!("example.com"));
        child.merge(delta);

        assert!(parent.get("variable").is_none());
        assert!(Arc::ptr_eq(
            parent.fast_cache().unwrap(),
            child.fast_cache().unwrap()
        ));
    }

    #[test]
    fn remote_envelope_never_contains_fast_cache() {
        let mut e = ScanEnv::new(ScanMethod::Remote, ScanUuid::new(), 8);
        e.set_fast_cache(Arc::new(json!({"huge": true})));
        let mut delta = Map::new();
        delta.insert("constant".into(), json!(1));
        e.merge(delta);

        let envelope = e.remote_envelope();
        let obj = envelope.as_object().unwrap();
        assert_eq!(obj.get("scan_method").unwrap(), "remote");
        assert_eq!(obj.get("workers").unwrap(), 8);
        assert_eq!(obj.get("constant").unwrap(), 1);
        assert!(!obj.contains_key(FAST_CACHE_KEY));
    }
}
