//! Remote function execution.
//!
//! Each scanner's probe logic is also deployed as a serverless function
//! named `task_<scanner>`. The executor invokes it synchronously with an
//! envelope of `{domain, options, scanner, environment}` (fast cache
//! excluded) and decodes the response envelope:
//!
//! - `{errorMessage: ...}`: platform-level failure, retriable
//! - `{lambda: {...}, data: <payload>, error?: <string>}`: success, or a
//!   scanner-level error (retriable); `lambda` merges into remote meta
//! - null / empty / missing `data`: retriable
//!
//! Retries are bounded by the run's retry budget; on exhaustion the most
//! recent successfully-decoded `data` is returned (possibly null). Read
//! timeouts are retriable; other transport failures are not.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::env::ScanEnv;
use crate::scanner::Options;

/// Read timeout on remote invocations. Remote probes can legitimately run
/// for many minutes.
pub const INVOKE_READ_TIMEOUT: Duration = Duration::from_secs(900);

/// Errors from the invocation transport.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("read timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invocation endpoint returned status {0}")]
    Status(u16),
}

impl InvokeError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            InvokeError::Timeout(_) => true,
            InvokeError::Status(_) => true,
            InvokeError::Transport(_) => false,
        }
    }
}

/// Synchronous invocation client for named remote functions.
///
/// One shared client serves every task of the run; credentials and
/// connection pooling are its concern, not the executor's.
pub trait FunctionInvoker: Send + Sync {
    fn invoke(&self, function: &str, payload: &[u8]) -> Result<Vec<u8>, InvokeError>;
}

/// HTTP-based invoker.
///
/// POSTs the envelope to `<endpoint>/functions/<name>/invocations`. A
/// bearer token is resolved from `DS_INVOKE_TOKEN` or, when a credential
/// profile is configured, `DS_INVOKE_TOKEN_<PROFILE>`.
pub struct HttpFunctionInvoker {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpFunctionInvoker {
    pub fn new(endpoint: &str, profile: Option<&str>) -> Self {
        let client = Client::builder()
            .timeout(INVOKE_READ_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        let token = match profile {
            Some(p) => std::env::var(format!("DS_INVOKE_TOKEN_{}", p.to_ascii_uppercase())).ok(),
            None => std::env::var("DS_INVOKE_TOKEN").ok(),
        };
        HttpFunctionInvoker {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }
}

impl FunctionInvoker for HttpFunctionInvoker {
    fn invoke(&self, function: &str, payload: &[u8]) -> Result<Vec<u8>, InvokeError> {
        let url = format!("{}/functions/{function}/invocations", self.endpoint);
        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(payload.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                InvokeError::Timeout(e.to_string())
            } else {
                InvokeError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(InvokeError::Status(status.as_u16()));
        }
        let body = response.bytes().map_err(|e| {
            if e.is_timeout() {
                InvokeError::Timeout(e.to_string())
            } else {
                InvokeError::Transport(e.to_string())
            }
        })?;
        Ok(body.to_vec())
    }
}

/// Remote execution details captured per task.
///
/// `retries` counts reattempts of this task's invocation; the remaining
/// fields mirror the remote side's self-report and back the remote columns
/// of the result table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteMeta {
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_stream_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_duration: Option<Value>,
}

/// The remote side's self-report inside a response envelope.
#[derive(Debug, Default, Deserialize)]
struct LambdaReport {
    request_id: Option<String>,
    log_group_name: Option<String>,
    log_stream_name: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    memory_limit: Option<Value>,
    measured_duration: Option<Value>,
}

impl RemoteMeta {
    /// Fold one attempt's report in; later attempts win field-wise.
    fn absorb(&mut self, report: LambdaReport) {
        let LambdaReport {
            request_id,
            log_group_name,
            log_stream_name,
            start_time,
            end_time,
            memory_limit,
            measured_duration,
        } = report;
        self.request_id = request_id.or(self.request_id.take());
        self.log_group_name = log_group_name.or(self.log_group_name.take());
        self.log_stream_name = log_stream_name.or(self.log_stream_name.take());
        self.start_time = start_time.or(self.start_time.take());
        self.end_time = end_time.or(self.end_time.take());
        self.memory_limit = memory_limit.or(self.memory_limit.take());
        self.measured_duration = measured_duration.or(self.measured_duration.take());
    }
}

/// Result of driving one remote invocation to completion.
#[derive(Debug)]
pub struct RemoteOutcome {
    /// Most recent successfully-decoded payload; null when none arrived.
    pub data: Value,
    pub meta: RemoteMeta,
    pub errors: Vec<String>,
}

/// One attempt's classification.
enum Attempt {
    Success(Value),
    Retry { error: String, data: Option<Value> },
    Fatal(String),
}

/// Drives bounded-retry invocations of `task_<scanner>` functions.
pub struct RemoteExecutor {
    invoker: std::sync::Arc<dyn FunctionInvoker>,
    max_retries: u32,
}

impl RemoteExecutor {
    pub fn new(invoker: std::sync::Arc<dyn FunctionInvoker>, max_retries: u32) -> Self {
        RemoteExecutor {
            invoker,
            max_retries,
        }
    }

    /// Invoke the scanner's remote function for one domain.
    ///
    /// Never fails outright: every failure is recorded in the outcome's
    /// error list and the caller always gets a payload (possibly null).
    pub fn execute(
        &self,
        scanner: &str,
        domain: &str,
        env: &ScanEnv,
        options: &Options,
    ) -> RemoteOutcome {
        let function = format!("task_{scanner}");
        let envelope = json!({
            "domain": domain,
            "options": options,
            "scanner": scanner,
            "environment": env.remote_envelope(),
        });

        let mut outcome = RemoteOutcome {
            data: Value::Null,
            meta: RemoteMeta::default(),
            errors: Vec::new(),
        };

        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(e) => {
                outcome.errors.push(format!("could not encode envelope for {function}: {e}"));
                return outcome;
            }
        };

        let mut attempt = 0u32;
        loop {
            match self.attempt(&function, &body, &mut outcome.meta) {
                Attempt::Success(data) => {
                    outcome.data = data;
                    break;
                }
                Attempt::Retry { error, data } => {
                    warn!(function, domain, attempt, error, "remote attempt failed");
                    outcome.errors.push(error);
                    if let Some(data) = data {
                        outcome.data = data;
                    }
                    if attempt >= self.max_retries {
                        break;
                    }
                    attempt += 1;
                    outcome.meta.retries = attempt;
                }
                Attempt::Fatal(error) => {
                    warn!(function, domain, attempt, error, "remote invocation failed hard");
                    outcome.errors.push(error);
                    break;
                }
            }
        }
        outcome
    }

    fn attempt(&self, function: &str, body: &[u8], meta: &mut RemoteMeta) -> Attempt {
        let bytes = match self.invoker.invoke(function, body) {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = format!("error invoking {function}: {e}");
                return if e.is_retriable() {
                    Attempt::Retry { error, data: None }
                } else {
                    Attempt::Fatal(error)
                };
            }
        };

        if bytes.is_empty() {
            return Attempt::Retry {
                error: format!("empty response from {function}"),
                data: None,
            };
        }
        let response: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return Attempt::Retry {
                    error: format!("could not decode response from {function}: {e}"),
                    data: None,
                }
            }
        };
        if response.is_null() {
            return Attempt::Retry {
                error: format!("null response from {function}"),
                data: None,
            };
        }

        if let Some(message) = response.get("errorMessage") {
            return Attempt::Retry {
                error: format!("error running {function}: {}", render(message)),
                data: None,
            };
        }

        if let Some(report) = response.get("lambda") {
            match serde_json::from_value::<LambdaReport>(report.clone()) {
                Ok(report) => meta.absorb(report),
                Err(e) => debug!(function, "undecodable remote self-report: {e}"),
            }
        }

        let data = response.get("data").cloned();
        if let Some(error) = response.get("error") {
            return Attempt::Retry {
                error: format!("scanner error in {function}: {}", render(error)),
                data,
            };
        }
        match data {
            Some(data) => Attempt::Success(data),
            None => Attempt::Retry {
                error: format!("no data in response from {function}"),
                data: None,
            },
        }
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
