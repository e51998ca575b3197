use ekoload_core::ErrorKind;

use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    ScriptError(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::ScriptError(_) => ExitCode::ScriptError,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::ScriptError(e) | Self::RuntimeError(e) => e,
        }
    }

    /// Classifies an engine error raised while preparing the run.
    pub fn from_core(context: &'static str, err: ekoload_core::Error) -> Self {
        let kind = match err.kind() {
            ErrorKind::InvalidFlow | ErrorKind::UnknownProcessor | ErrorKind::InvalidStepSpec => {
                Self::ScriptError
            }
            ErrorKind::Connection => Self::InvalidInput,
            ErrorKind::AuthTransport
            | ErrorKind::AuthResponse
            | ErrorKind::AuthTokenMissing
            | ErrorKind::Send
            | ErrorKind::Processor => Self::RuntimeError,
        };
        kind(anyhow::Error::new(err).context(context))
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
