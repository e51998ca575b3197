pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable, snake_case classification of [`Error`], used for event tallies and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidStepSpec,
    InvalidFlow,
    UnknownProcessor,
    Processor,
    AuthTransport,
    AuthResponse,
    AuthTokenMissing,
    Connection,
    Send,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid step: {0}")]
    InvalidStepSpec(String),

    #[error("invalid flow: {0}")]
    InvalidFlow(String),

    #[error("flow references unknown processor `{0}`")]
    UnknownProcessor(String),

    #[error("processor failed: {0}")]
    Processor(String),

    #[error("token request failed: {0}")]
    AuthTransport(#[source] ekoload_http::Error),

    #[error("token response is not valid json: {0}")]
    AuthResponse(#[source] serde_json::Error),

    #[error("token response has no `accessToken`")]
    AuthTokenMissing,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("send failed: {0}")]
    Send(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStepSpec(_) => ErrorKind::InvalidStepSpec,
            Self::InvalidFlow(_) => ErrorKind::InvalidFlow,
            Self::UnknownProcessor(_) => ErrorKind::UnknownProcessor,
            Self::Processor(_) => ErrorKind::Processor,
            Self::AuthTransport(_) => ErrorKind::AuthTransport,
            Self::AuthResponse(_) => ErrorKind::AuthResponse,
            Self::AuthTokenMissing => ErrorKind::AuthTokenMissing,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Send(_) => ErrorKind::Send,
        }
    }

    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor(message.into())
    }
}
