//! In-process probe execution.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::env::ScanEnv;
use crate::executor::headless::HeadlessBridge;
use crate::executor::ExecError;
use crate::scanner::{Options, Scanner};

/// Runs probes in the current process.
///
/// Payloads are normalized through a JSON round-trip so locally-produced
/// values and remotely-decoded values have identical timestamp and numeric
/// forms.
pub struct LocalExecutor {
    headless: Option<Arc<dyn HeadlessBridge>>,
}

impl LocalExecutor {
    pub fn new(headless: Option<Arc<dyn HeadlessBridge>>) -> Self {
        LocalExecutor { headless }
    }

    pub fn execute(
        &self,
        scanner: &dyn Scanner,
        domain: &str,
        env: &ScanEnv,
        options: &Options,
    ) -> Result<Value, ExecError> {
        let raw = if scanner.scan_headless() {
            let bridge = self.headless.as_ref().ok_or_else(|| {
                ExecError::Headless("scanner needs a browser but no bridge is configured".into())
            })?;
            debug!(scanner = scanner.name(), domain, "dispatching to headless bridge");
            bridge.scan(scanner.name(), domain, env, options)?
        } else {
            scanner.scan(domain, env, options)?
        };

        let bytes = serde_json::to_vec(&raw).map_err(ExecError::Normalize)?;
        serde_json::from_slice(&bytes).map_err(ExecError::Normalize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ScanMethod;
    use crate::scanner::ProbeError;
    use ds_common::ScanUuid;
    use serde_json::json;

    struct Fixed(Value);

    impl Scanner for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn headers(&self) -> Vec<String> {
            vec!["V".into()]
        }
        fn to_rows(&self, payload: &Value) -> Vec<Vec<Value>> {
            vec![vec![payload.clone()]]
        }
        fn scan(&self, _: &str, _: &ScanEnv, _: &Options) -> Result<Value, ProbeError> {
            Ok(self.0.clone())
        }
    }

    struct NeedsBrowser;

    impl Scanner for NeedsBrowser {
        fn name(&self) -> &'static str {
            "browser"
        }
        fn headers(&self) -> Vec<String> {
            Vec::new()
        }
        fn to_rows(&self, _: &Value) -> Vec<Vec<Value>> {
            Vec::new()
        }
        fn scan_headless(&self) -> bool {
            true
        }
        fn scan(&self, _: &str, _: &ScanEnv, _: &Options) -> Result<Value, ProbeError> {
            Err(ProbeError::Probe("must not run in-process".into()))
        }
    }

    struct EchoBridge;

    impl HeadlessBridge for EchoBridge {
        fn scan(
            &self,
            scanner: &str,
            domain: &str,
            _env: &ScanEnv,
            _options: &Options,
        ) -> Result<Value, ExecError> {
            Ok(json!({ "scanner": scanner, "domain": domain }))
        }
    }

    fn env() -> ScanEnv {
        ScanEnv::new(ScanMethod::Local, ScanUuid::new(), 1)
    }

    #[test]
    fn executes_probe_and_normalizes() {
        let exec = LocalExecutor::new(None);
        let payload = exec
            .execute(&Fixed(json!({"ok": true, "n": 2.0})), "example.com", &env(), &Options::new())
            .unwrap();
        assert_eq!(payload["ok"], json!(true));
    }

    #[test]
    fn headless_scanner_goes_through_bridge() {
        let exec = LocalExecutor::new(Some(Arc::new(EchoBridge)));
        let payload = exec
            .execute(&NeedsBrowser, "example.com", &env(), &Options::new())
            .unwrap();
        assert_eq!(payload, json!({"scanner": "browser", "domain": "example.com"}));
    }

    #[test]
    fn headless_scanner_without_bridge_is_an_error() {
        let exec = LocalExecutor::new(None);
        let err = exec
            .execute(&NeedsBrowser, "example.com", &env(), &Options::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Headless(_)));
    }

    #[test]
    fn probe_errors_bubble_to_the_caller() {
        struct Failing;
        impl Scanner for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn headers(&self) -> Vec<String> {
                Vec::new()
            }
            fn to_rows(&self, _: &Value) -> Vec<Vec<Value>> {
                Vec::new()
            }
            fn scan(&self, _: &str, _: &ScanEnv, _: &Options) -> Result<Value, ProbeError> {
                Err(ProbeError::Probe("boom".into()))
            }
        }

        let exec = LocalExecutor::new(None);
        let err = exec
            .execute(&Failing, "example.com", &env(), &Options::new())
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
