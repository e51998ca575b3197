use std::sync::Arc;

use crate::Vars;
use crate::transport::FrameConnection;

/// A session's handle on its connection.
#[derive(Debug, Clone)]
pub enum SessionConnection {
    /// Opened for this session; closed when the session ends.
    Owned(Arc<dyn FrameConnection>),
    /// The scenario-wide connection; never closed by a session.
    Shared(Arc<dyn FrameConnection>),
}

impl SessionConnection {
    pub fn get(&self) -> &Arc<dyn FrameConnection> {
        match self {
            Self::Owned(c) | Self::Shared(c) => c,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Closes an owned connection. Consumes the handle, so a session closes at most once.
    pub async fn release(self) {
        if let Self::Owned(conn) = self {
            conn.close().await;
        }
    }
}

/// Per-session mutable state.
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: Arc<str>,
    pub vars: Vars,
    connection: Option<SessionConnection>,
    /// Call steps whose frame was written successfully.
    pub success_count: u64,
    /// Top-level non-think steps, set once before execution.
    pub pending_requests: u64,
}

impl SessionContext {
    pub fn new(vars: Vars) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), vars)
    }

    pub fn with_id(session_id: impl Into<Arc<str>>, vars: Vars) -> Self {
        Self {
            session_id: session_id.into(),
            vars,
            connection: None,
            success_count: 0,
            pending_requests: 0,
        }
    }

    pub fn connection(&self) -> Option<&SessionConnection> {
        self.connection.as_ref()
    }

    pub(crate) fn attach(&mut self, conn: SessionConnection) {
        self.connection = Some(conn);
    }

    pub(crate) fn detach(&mut self) -> Option<SessionConnection> {
        self.connection.take()
    }
}
