//! Exchange of session credentials for a connection token.

use std::time::Duration;

use async_trait::async_trait;
use ekoload_http::{HttpClient, HttpRequest};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::Vars;
use crate::error::{Error, Result};

pub const APP_ID: &str = "com.ekoaaapp.eko";
pub const DEVICE_ID: &str = "webapp2x0d724ffc9-6c91-48c4-934e-660c41d493db1525756917094";
pub const DEVICE_MODEL: &str = "browser";
pub const DEVICE_TYPE: &str = "web";
pub const DEVICE_VERSION: &str = "9.4.0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Reads `username` / `password` from session variables. Non-string values are
    /// stringified.
    pub fn from_vars(vars: &Vars) -> Self {
        let field = |name: &str| match vars.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        Self {
            username: field("username"),
            password: field("password"),
        }
    }
}

/// Token request body: fixed device identity plus the session's credentials. Absent
/// credentials are omitted rather than sent as `null`.
fn token_request(credentials: &Credentials) -> Value {
    let mut body = json!({
        "apiVersion": 0,
        "appId": APP_ID,
        "deviceId": DEVICE_ID,
        "deviceModel": DEVICE_MODEL,
        "deviceType": DEVICE_TYPE,
        "deviceVersion": DEVICE_VERSION,
        "domain": "",
        "username": credentials.username,
        "password": credentials.password,
    });
    if let Value::Object(fields) = &mut body {
        fields.retain(|_, v| !v.is_null());
    }
    body
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// One attempt; no retry.
    async fn authenticate(&self, endpoint: &str, credentials: &Credentials) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: HttpClient,
    timeout: Option<Duration>,
}

impl HttpAuthenticator {
    pub fn new(client: HttpClient, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, endpoint: &str, credentials: &Credentials) -> Result<String> {
        let body = token_request(credentials).to_string();
        let req = HttpRequest::post_json(endpoint, body).with_timeout(self.timeout);

        debug!(endpoint, username = ?credentials.username, "requesting token");
        let res = self
            .client
            .request(req)
            .await
            .map_err(Error::AuthTransport)?;

        if !res.is_success() {
            warn!(
                endpoint,
                status = res.status,
                "token endpoint answered with a non-success status"
            );
        }
        access_token(&res.body)
    }
}

/// Extracts `accessToken` from a token response body.
pub fn access_token(body: &[u8]) -> Result<String> {
    let parsed: Value = serde_json::from_slice(body).map_err(Error::AuthResponse)?;
    parsed
        .get("accessToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(Error::AuthTokenMissing)
}
