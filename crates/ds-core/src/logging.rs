//! Logging initialization for ds-core.
//!
//! All log output goes to stderr so stdout stays clean for anything a
//! wrapper wants to consume. Filtering follows `DS_LOG` (then `RUST_LOG`),
//! falling back to a level derived from the CLI verbosity flags.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs.
pub fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_env("DS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(format!("ds_core={default_level},ds_common={default_level}")));

    let use_ansi = std::io::stderr().is_terminal();
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(use_ansi)
        .init();
}
