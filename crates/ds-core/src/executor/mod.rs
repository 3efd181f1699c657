//! Execution backends.
//!
//! A probe runs either in-process (`local`) or as a remote function
//! invocation (`remote`); browser-backed probes go through the headless
//! bridge. The per-domain task picks the backend from the environment's
//! `scan_method`.

pub mod headless;
pub mod local;
pub mod remote;

use thiserror::Error;

use crate::scanner::ProbeError;

pub use headless::{CommandBridge, HeadlessBridge};
pub use local::LocalExecutor;
pub use remote::{FunctionInvoker, HttpFunctionInvoker, InvokeError, RemoteExecutor, RemoteMeta};

/// Errors from local execution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("headless bridge error: {0}")]
    Headless(String),

    #[error("payload normalization error: {0}")]
    Normalize(#[source] serde_json::Error),
}
