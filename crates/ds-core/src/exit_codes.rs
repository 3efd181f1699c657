//! Exit codes for the ds-core CLI.
//!
//! Exit codes communicate run outcome without requiring output parsing and
//! are a stable contract for automation:
//! - 0: run completed
//! - 1: configuration error or hard abort (a scanner's init refused)

/// Exit codes for ds-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Run completed; all selected scanners processed every domain.
    Success = 0,

    /// Configuration error at startup, or a scanner init aborted the run.
    Failure = 1,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::Failure.as_i32(), 1);
    }
}
