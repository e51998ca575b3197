//! Framed connections: the seam between sessions and the wire.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::config::TransportOptions;
use crate::error::{Error, Result};
use crate::{frame, tls};

/// A live connection that carries complete frames.
///
/// Implementations must accept concurrent `send` calls (shared-reuse mode) and write each
/// frame as one message.
#[async_trait]
pub trait FrameConnection: fmt::Debug + Send + Sync {
    async fn send(&self, frame: String) -> Result<()>;

    /// Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
        options: &TransportOptions,
    ) -> Result<Arc<dyn FrameConnection>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket connections with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &Url,
        options: &TransportOptions,
    ) -> Result<Arc<dyn FrameConnection>> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(e.to_string()))?;

        for (name, value) in &options.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Connection(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Connection(format!("invalid value for `{name}`: {e}")))?;
            request.headers_mut().insert(header, value);
        }

        let tls = tokio_tungstenite::Connector::Rustls(tls::client_config(
            options.reject_unauthorized,
        )?);
        let connecting =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(tls));

        let connected = match options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| Error::Connection(format!("timed out after {timeout:?}")))?,
            None => connecting.await,
        };
        let (stream, _response) = connected.map_err(|e| Error::Connection(e.to_string()))?;

        debug!(host = url.host_str().unwrap_or_default(), path = url.path(), "websocket open");
        Ok(Arc::new(WsConnection::spawn(stream)))
    }
}

pub struct WsConnection {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    frames_received: Arc<AtomicU64>,
}

impl WsConnection {
    fn spawn(stream: WsStream) -> Self {
        let (sink, mut stream) = stream.split();
        let frames_received = Arc::new(AtomicU64::new(0));

        let counter = frames_received.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                        match frame::decode(text.as_str()) {
                            Some(f) => trace!(code = f.code, "inbound frame"),
                            None => trace!(frame = text.as_str(), "unrecognized inbound frame"),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(error = %err, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Self {
            sink: tokio::sync::Mutex::new(sink),
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            frames_received,
        }
    }

    /// Inbound text frames observed so far.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    fn stop_reader(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

#[async_trait]
impl FrameConnection for WsConnection {
    async fn send(&self, frame: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut sink = self.sink.lock().await;
            if let Err(err) = sink.close().await {
                debug!(error = %err, "websocket close failed");
            }
        }
        self.stop_reader();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("frames_received", &self.frames_received())
            .finish_non_exhaustive()
    }
}
