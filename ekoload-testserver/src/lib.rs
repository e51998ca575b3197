use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PATH_TOKEN: &str = "/token";

/// Usernames with scripted token-endpoint behavior.
pub const USER_NO_TOKEN: &str = "no-token";
pub const USER_BAD_BODY: &str = "bad-body";

/// Code the server uses for frames it pushes back to clients.
pub const ACK_CODE: u32 = 43;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    token_requests: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    frames: Mutex<Vec<String>>,
    tokens_seen: Mutex<Vec<String>>,
    versions_seen: Mutex<Vec<String>>,
    auth_bodies: Mutex<Vec<serde_json::Value>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TestServerStats {
    pub fn token_requests(&self) -> u64 {
        self.inner.token_requests.load(Ordering::Relaxed)
    }

    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    pub fn connections_closed(&self) -> u64 {
        self.inner.connections_closed.load(Ordering::Relaxed)
    }

    /// Raw text frames received over every websocket, in arrival order.
    pub fn frames(&self) -> Vec<String> {
        lock(&self.inner.frames).clone()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        lock(&self.inner.tokens_seen).clone()
    }

    pub fn versions_seen(&self) -> Vec<String> {
        lock(&self.inner.versions_seen).clone()
    }

    pub fn auth_bodies(&self) -> Vec<serde_json::Value> {
        lock(&self.inner.auth_bodies).clone()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
}

async fn handle_token(State(stats): State<TestServerStats>, body: Bytes) -> (StatusCode, Bytes) {
    stats.inner.token_requests.fetch_add(1, Ordering::Relaxed);

    let req: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, Bytes::from_static(b"bad json")),
    };
    lock(&stats.inner.auth_bodies).push(req.clone());

    let username = req
        .get("username")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match username.as_str() {
        USER_NO_TOKEN => (
            StatusCode::UNAUTHORIZED,
            Bytes::from_static(br#"{"error":"invalid credentials"}"#),
        ),
        USER_BAD_BODY => (StatusCode::OK, Bytes::from_static(b"<html>oops</html>")),
        _ => {
            let res = TokenResponse {
                access_token: format!("tok-{username}"),
            };
            match serde_json::to_vec(&res) {
                Ok(bytes) => (StatusCode::OK, Bytes::from(bytes)),
                Err(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Bytes::from_static(b"encode error"),
                ),
            }
        }
    }
}

async fn handle_rpc(
    State(stats): State<TestServerStats>,
    Path(version): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.get("token").filter(|t| !t.is_empty()).cloned() else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };

    lock(&stats.inner.tokens_seen).push(token);
    lock(&stats.inner.versions_seen).push(version);

    ws.on_upgrade(move |socket| serve_socket(socket, stats))
}

async fn serve_socket(mut socket: WebSocket, stats: TestServerStats) {
    stats
        .inner
        .connections_opened
        .fetch_add(1, Ordering::Relaxed);

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };

        match msg {
            Message::Text(text) => {
                let text = text.as_str().to_string();
                let ack = ack_for(&text);
                lock(&stats.inner.frames).push(text);
                if socket.send(Message::Text(ack.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    stats
        .inner
        .connections_closed
        .fetch_add(1, Ordering::Relaxed);
}

fn ack_for(frame: &str) -> String {
    let id = frame
        .split_once('|')
        .and_then(|(_, json)| serde_json::from_str::<serde_json::Value>(json).ok())
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(serde_json::Value::Null);
    format!("{ACK_CODE}|{}", serde_json::json!({ "id": id, "ok": true }))
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_TOKEN, post(handle_token))
        .route("/{version}", get(handle_rpc))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();

        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://host:port`, the value scripts use as `config.target`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn token_url(&self) -> String {
        format!("http://{}{PATH_TOKEN}", self.addr)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
