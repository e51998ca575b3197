use ekoload_core::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The run completed but one or more sessions failed.
    SessionsFailed = 10,

    /// The script could not be turned into a runnable flow (unknown processor, bad step shape).
    ScriptError = 20,

    /// Invalid CLI/config input (bad flags, unreadable script, malformed YAML).
    InvalidInput = 30,

    /// Internal/runtime error (client setup, IO while reporting).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_summary(summary: &RunSummary) -> Self {
        if summary.all_succeeded() {
            Self::Success
        } else {
            Self::SessionsFailed
        }
    }
}
