//! Connection acquisition: per-session, or one connection shared by the whole scenario.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::Vars;
use crate::auth::{Authenticator, Credentials};
use crate::config::{ScenarioConfig, TokenSource};
use crate::context::SessionConnection;
use crate::error::{Error, Result};
use crate::transport::{Connector, FrameConnection};

/// Builds `<target>/<version>?token=<token>`.
pub fn rpc_url(target: &str, version: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(target).map_err(|e| Error::Connection(format!("invalid target `{target}`: {e}")))?;

    url.path_segments_mut()
        .map_err(|_| Error::Connection(format!("target `{target}` cannot have a path")))?
        .pop_if_empty()
        .push(version);
    url.query_pairs_mut().append_pair("token", token);

    Ok(url)
}

pub struct ConnectionManager {
    config: Arc<ScenarioConfig>,
    authenticator: Arc<dyn Authenticator>,
    connector: Arc<dyn Connector>,
    /// Present only in shared-reuse mode. Initialized at most once; a failed
    /// initialization leaves it empty for the next session to retry.
    shared: Option<OnceCell<Arc<dyn FrameConnection>>>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<ScenarioConfig>,
        authenticator: Arc<dyn Authenticator>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let shared = config.reuse_connection.then(OnceCell::new);
        Self {
            config,
            authenticator,
            connector,
            shared,
        }
    }

    pub async fn acquire(&self, vars: &Vars) -> Result<SessionConnection> {
        match &self.shared {
            Some(cell) => {
                let conn = cell.get_or_try_init(|| self.open(vars)).await?;
                Ok(SessionConnection::Shared(conn.clone()))
            }
            None => Ok(SessionConnection::Owned(self.open(vars).await?)),
        }
    }

    /// Closes the shared connection, if one was opened.
    pub async fn shutdown(&self) {
        if let Some(conn) = self.shared.as_ref().and_then(OnceCell::get) {
            conn.close().await;
        }
    }

    async fn open(&self, vars: &Vars) -> Result<Arc<dyn FrameConnection>> {
        let token = match &self.config.token {
            TokenSource::Static(token) => token.clone(),
            TokenSource::Endpoint(endpoint) => {
                self.authenticator
                    .authenticate(endpoint, &Credentials::from_vars(vars))
                    .await?
            }
        };

        let url = rpc_url(&self.config.target, &self.config.version, &token)?;
        debug!(
            target = %self.config.target,
            version = %self.config.version,
            shared = self.shared.is_some(),
            "opening connection"
        );
        self.connector.connect(&url, &self.config.transport).await
    }
}
