use std::time::Duration;

use crate::Vars;

pub const DEFAULT_VERSION: &str = "v2";

/// Where a session's connection token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Exchange session credentials for a token at this URL.
    Endpoint(String),
    /// Use this token for every connection; no authentication request is made.
    Static(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThinkDefaults {
    /// Randomizes each pause by up to this percentage in either direction.
    pub jitter: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// Extra headers sent with the websocket upgrade request.
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Option<Duration>,
    /// Timeout for the token request.
    pub auth_timeout: Option<Duration>,
    /// When false, server certificates are not verified.
    pub reject_unauthorized: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            connect_timeout: None,
            auth_timeout: None,
            reject_unauthorized: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    /// Base URL of the service, e.g. `wss://svc`.
    pub target: String,
    /// Protocol version path segment appended to `target`.
    pub version: String,
    pub token: TokenSource,
    pub think: ThinkDefaults,
    pub transport: TransportOptions,
    /// Share one physical connection across every session of the scenario.
    pub reuse_connection: bool,
    /// Seeded into every session's variables (credentials, identity, fixtures).
    pub variables: Vars,
}

impl ScenarioConfig {
    pub fn new(target: impl Into<String>, token: TokenSource) -> Self {
        Self {
            target: target.into(),
            version: DEFAULT_VERSION.to_string(),
            token,
            think: ThinkDefaults::default(),
            transport: TransportOptions::default(),
            reuse_connection: false,
            variables: Vars::new(),
        }
    }
}
