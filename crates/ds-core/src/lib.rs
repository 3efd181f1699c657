//! Domain scan dispatcher library.
//!
//! Runs a set of domains through a set of named scanners, executing each
//! probe either in-process or as a remote function invocation, with a
//! read-through/write-through result cache and one CSV result table per
//! scanner:
//! - `scanner`: the pluggable probe module contract and built-in scanners
//! - `dispatch`: run controller, per-scanner lifecycle, per-domain tasks
//! - `executor`: local and remote execution backends
//! - `cache`, `output`: on-disk result cache and result tables
//! - `enrich`: post-run remote log enrichment
//!
//! The binary entry point is in `main.rs`.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod enrich;
pub mod env;
pub mod executor;
pub mod exit_codes;
pub mod logging;
pub mod output;
pub mod scanner;
