//! Headless browser bridge.
//!
//! Some scanners need a real browser to probe a domain. The dispatcher
//! does not host one; it delegates to an external bridge process speaking
//! JSON over stdin/stdout. The request carries the scanner name, the
//! domain, the environment, and the options; the response body is the scan
//! payload.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde_json::{json, Value};
use tracing::debug;

use crate::env::ScanEnv;
use crate::executor::ExecError;
use crate::scanner::Options;

/// External collaborator that runs browser-backed probes.
pub trait HeadlessBridge: Send + Sync {
    fn scan(
        &self,
        scanner: &str,
        domain: &str,
        env: &ScanEnv,
        options: &Options,
    ) -> Result<Value, ExecError>;
}

/// Bridge implementation that spawns a bridge program per probe.
///
/// The request envelope goes to the child's stdin; the payload is read
/// from its stdout. No dispatcher-imposed timeout: browser probes own
/// their pacing the same way local probes do.
pub struct CommandBridge {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandBridge {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        CommandBridge {
            program: program.into(),
            args,
        }
    }
}

impl HeadlessBridge for CommandBridge {
    fn scan(
        &self,
        scanner: &str,
        domain: &str,
        env: &ScanEnv,
        options: &Options,
    ) -> Result<Value, ExecError> {
        let request = json!({
            "scanner": scanner,
            "domain": domain,
            "environment": env.remote_envelope(),
            "options": options,
        });
        let body = serde_json::to_vec(&request)
            .map_err(|e| ExecError::Headless(format!("encode request: {e}")))?;

        debug!(scanner, domain, program = %self.program.display(), "headless bridge invoke");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Headless(format!("spawn {}: {e}", self.program.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&body) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ExecError::Headless(format!("write request: {e}"))),
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ExecError::Headless(format!("wait: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            return Err(ExecError::Headless(format!(
                "bridge exited with code {code}: {}",
                stderr.chars().take(500).collect::<String>()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecError::Headless(format!("decode payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ScanMethod;
    use ds_common::ScanUuid;

    fn env() -> ScanEnv {
        ScanEnv::new(ScanMethod::Local, ScanUuid::new(), 1)
    }

    #[test]
    #[cfg(unix)]
    fn bridge_round_trips_payload() {
        // A bridge that echoes a fixed payload regardless of the request.
        let bridge = CommandBridge::new("/bin/sh", vec![
            "-c".to_string(),
            "cat > /dev/null; echo '{\"rendered\": true}'".to_string(),
        ]);
        let payload = bridge
            .scan("third_parties", "example.com", &env(), &Options::new())
            .unwrap();
        assert_eq!(payload, json!({"rendered": true}));
    }

    #[test]
    #[cfg(unix)]
    fn bridge_failure_carries_stderr() {
        let bridge = CommandBridge::new("/bin/sh", vec![
            "-c".to_string(),
            "echo boom >&2; exit 3".to_string(),
        ]);
        let err = bridge
            .scan("third_parties", "example.com", &env(), &Options::new())
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("code 3"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn missing_program_is_an_error() {
        let bridge = CommandBridge::new("/nonexistent/bridge", Vec::new());
        assert!(bridge
            .scan("x", "example.com", &env(), &Options::new())
            .is_err());
    }
}
