//! One virtual user: acquire a connection, run the compiled flow, release.

use std::sync::Arc;

use ekoload_http::HttpClient;
use tracing::{debug, warn};

use crate::Vars;
use crate::auth::{Authenticator, HttpAuthenticator};
use crate::compiler::CompiledFlow;
use crate::config::ScenarioConfig;
use crate::connection::ConnectionManager;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::transport::{Connector, WsConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Executing,
    Closing,
    Errored,
    Done,
}

#[derive(Debug, thiserror::Error)]
#[error("session {session_id} failed: {error}")]
pub struct SessionFailure {
    pub session_id: Arc<str>,
    pub success_count: u64,
    #[source]
    pub error: Error,
}

/// Everything sessions of one scenario share.
pub struct Scenario {
    config: Arc<ScenarioConfig>,
    flow: Arc<CompiledFlow>,
    connections: ConnectionManager,
    events: Arc<dyn EventSink>,
}

impl Scenario {
    /// Authenticates over HTTP and connects over websockets.
    pub fn new(
        config: ScenarioConfig,
        flow: CompiledFlow,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let client = HttpClient::new().map_err(Error::AuthTransport)?;
        let authenticator = HttpAuthenticator::new(client, config.transport.auth_timeout);
        Ok(Self::with_parts(
            config,
            flow,
            Arc::new(authenticator),
            Arc::new(WsConnector),
            events,
        ))
    }

    pub fn with_parts(
        config: ScenarioConfig,
        flow: CompiledFlow,
        authenticator: Arc<dyn Authenticator>,
        connector: Arc<dyn Connector>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            connections: ConnectionManager::new(config.clone(), authenticator, connector),
            config,
            flow: Arc::new(flow),
            events,
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn flow(&self) -> &CompiledFlow {
        &self.flow
    }

    /// Runs one session. `seed` is layered over the scenario variables.
    ///
    /// An owned connection is closed exactly once on every path that opened one.
    /// Failures have already been reported to the event sink when this returns.
    pub async fn run_session(&self, seed: Vars) -> Result<SessionContext, SessionFailure> {
        let mut vars = self.config.variables.clone();
        vars.extend(seed);

        let mut ctx = SessionContext::new(vars);
        ctx.pending_requests = self.flow.pending_requests();
        let events = self.events.as_ref();

        transition(&ctx, SessionState::Connecting);
        events.emit(Event::Started);

        let conn = match self.connections.acquire(&ctx.vars).await {
            Ok(conn) => conn,
            Err(error) => {
                events.emit(Event::error(&error));
                transition(&ctx, SessionState::Errored);
                return Err(failure(&ctx, error));
            }
        };
        ctx.attach(conn);

        transition(&ctx, SessionState::Executing);
        let outcome = self.flow.run(&mut ctx, events).await;

        transition(&ctx, SessionState::Closing);
        if let Some(conn) = ctx.detach() {
            conn.release().await;
        }

        match outcome {
            Ok(()) => {
                transition(&ctx, SessionState::Done);
                Ok(ctx)
            }
            Err(error) => {
                warn!(session_id = %ctx.session_id, error = %error, "session failed");
                transition(&ctx, SessionState::Errored);
                Err(failure(&ctx, error))
            }
        }
    }

    /// Closes the scenario-wide connection, if any. Call once every session has finished.
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("config", &self.config)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

fn transition(ctx: &SessionContext, state: SessionState) {
    debug!(session_id = %ctx.session_id, %state, "session state");
}

fn failure(ctx: &SessionContext, error: Error) -> SessionFailure {
    SessionFailure {
        session_id: ctx.session_id.clone(),
        success_count: ctx.success_count,
        error,
    }
}
