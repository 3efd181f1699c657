//! Exercise scanner.
//!
//! Does nothing time-consuming or destructive, but walks every hook the
//! dispatcher offers: `init` contributes a constant, `init_domain` a
//! per-domain variable, and `scan` reflects both back so the environment
//! plumbing shows up in the result table.

use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::env::ScanEnv;
use crate::scanner::{HookOutcome, Options, ProbeError, Scanner};

pub struct Noop;

impl Scanner for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn headers(&self) -> Vec<String> {
        vec!["Completed".into(), "Constant".into(), "Variable".into()]
    }

    fn default_workers(&self) -> Option<usize> {
        Some(2)
    }

    fn init(&self, _env: &ScanEnv, _options: &Options) -> Result<HookOutcome, ProbeError> {
        debug!("noop init");
        let mut delta = Map::new();
        delta.insert("constant".into(), json!(12345));
        Ok(HookOutcome::Update(delta))
    }

    fn init_domain(
        &self,
        domain: &str,
        _env: &ScanEnv,
        _options: &Options,
    ) -> Result<HookOutcome, ProbeError> {
        debug!(domain, "noop init_domain");
        let mut delta = Map::new();
        delta.insert("variable".into(), json!(domain));
        Ok(HookOutcome::Update(delta))
    }

    fn scan(&self, domain: &str, env: &ScanEnv, options: &Options) -> Result<Value, ProbeError> {
        if let Some(delay) = options.get("noop_delay").and_then(Value::as_u64) {
            thread::sleep(Duration::from_secs(delay));
        }
        debug!(domain, "noop scan");
        Ok(json!({
            "complete": true,
            "constant": env.get("constant").cloned().unwrap_or(Value::Null),
            "variable": env.get("variable").cloned().unwrap_or(Value::Null),
        }))
    }

    fn to_rows(&self, payload: &Value) -> Vec<Vec<Value>> {
        vec![vec![
            payload.get("complete").cloned().unwrap_or(Value::Null),
            payload.get("constant").cloned().unwrap_or(Value::Null),
            payload.get("variable").cloned().unwrap_or(Value::Null),
        ]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ScanMethod;
    use ds_common::ScanUuid;

    #[test]
    fn scan_reflects_environment_through_both_hooks() {
        let scanner = Noop;
        let mut env = ScanEnv::new(ScanMethod::Local, ScanUuid::new(), 2);
        let options = Options::new();

        match scanner.init(&env, &options).unwrap() {
            HookOutcome::Update(delta) => env.merge(delta),
            other => panic!("unexpected init outcome: {other:?}"),
        }
        let mut forked = env.clone();
        match scanner.init_domain("example.com", &forked, &options).unwrap() {
            HookOutcome::Update(delta) => forked.merge(delta),
            other => panic!("unexpected init_domain outcome: {other:?}"),
        }

        let payload = scanner.scan("example.com", &forked, &options).unwrap();
        assert_eq!(payload["complete"], json!(true));
        assert_eq!(payload["constant"], json!(12345));
        assert_eq!(payload["variable"], json!("example.com"));

        let rows = scanner.to_rows(&payload);
        assert_eq!(rows, vec![vec![json!(true), json!(12345), json!("example.com")]]);
    }

    #[test]
    fn declares_two_workers() {
        assert_eq!(Noop.default_workers(), Some(2));
    }
}
