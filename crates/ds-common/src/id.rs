//! Run identity types.
//!
//! A scan run is identified by a single `ScanUuid` that is stable across
//! every scanner and every domain of that run. It appears in the run
//! metadata record and in every remote invocation envelope, which is what
//! lets remote-side logs be correlated back to a run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Run-wide scan identifier.
///
/// Wraps a v4 UUID in its canonical hyphenated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanUuid(pub String);

impl ScanUuid {
    /// Generate a fresh run identifier.
    pub fn new() -> Self {
        ScanUuid(uuid::Uuid::new_v4().to_string())
    }

    /// Parse and validate an existing identifier string.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok()?;
        Some(ScanUuid(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScanUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
