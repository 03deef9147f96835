//! CLI-specific type definitions.

/// Exit codes for the CLI application.
///
/// - 0: every role reached its requested end state (or was legitimately
///   skipped: not found, not eligible, protected)
/// - 1: the run completed but at least one role or account failed
/// - 2: fatal condition, nothing further was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,

    /// Per-role or per-account failures; the batch still ran to the end
    RoleFailures,

    /// Invalid input or configuration, or the credential chain failed
    Fatal,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::RoleFailures => 1,
            Self::Fatal => 2,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(exit_code: ExitCode) -> Self {
        exit_code.code()
    }
}
