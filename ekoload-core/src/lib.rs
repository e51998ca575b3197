//! Session engine for load-testing framed-RPC websocket services.
//!
//! A scenario's flow is compiled once ([`compile`]), then each virtual user runs it through
//! [`Scenario::run_session`]: authenticate, connect (or join the shared connection), execute
//! the steps, close. [`run_phases`] drives sessions on an arrival schedule.

pub mod auth;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod events;
pub mod flow;
pub mod frame;
pub mod params;
pub mod processor;
pub mod runner;
pub mod session;
pub mod template;
pub mod transport;

mod tls;

#[cfg(test)]
mod testing;

/// Session variables.
pub type Vars = serde_json::Map<String, serde_json::Value>;

pub use auth::{Authenticator, Credentials, HttpAuthenticator};
pub use compiler::{CompiledFlow, compile};
pub use config::{ScenarioConfig, ThinkDefaults, TokenSource, TransportOptions};
pub use connection::ConnectionManager;
pub use context::{SessionConnection, SessionContext};
pub use error::{Error, ErrorKind, Result};
pub use events::{Event, EventSink, NoopSink, StatsSink};
pub use flow::{CallSpec, Collection, LoopBound, LoopSpec, StepSpec, ThinkSpec};
pub use processor::{FnProcessor, Processor, Processors};
pub use runner::{Arrivals, Phase, RunSummary, run_phases};
pub use session::{Scenario, SessionFailure, SessionState};
pub use transport::{Connector, FrameConnection, WsConnector};
