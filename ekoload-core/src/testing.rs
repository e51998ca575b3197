//! In-memory fakes for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;

use crate::auth::{Authenticator, Credentials};
use crate::config::TransportOptions;
use crate::error::{Error, ErrorKind, Result};
use crate::events::{Event, EventSink};
use crate::transport::{Connector, FrameConnection};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error { kind, .. } => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        lock(&self.events).push(event);
    }
}

#[derive(Debug, Default)]
pub struct RecordingConnection {
    frames: Mutex<Vec<String>>,
    closes: AtomicUsize,
    fail_sends: bool,
}

impl RecordingConnection {
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<String> {
        lock(&self.frames).clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameConnection for RecordingConnection {
    async fn send(&self, frame: String) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Send("connection reset".into()));
        }
        lock(&self.frames).push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one fresh [`RecordingConnection`] per connect and remembers them.
#[derive(Debug, Default)]
pub struct FakeConnector {
    opened: Mutex<Vec<(Url, Arc<RecordingConnection>)>>,
    refuse: bool,
    fail_sends: bool,
}

impl FakeConnector {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn with_failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<(Url, Arc<RecordingConnection>)> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        url: &Url,
        _options: &TransportOptions,
    ) -> Result<Arc<dyn FrameConnection>> {
        if self.refuse {
            return Err(Error::Connection("connection refused".into()));
        }
        // Widen the window in which concurrent sessions could race on a shared connection.
        tokio::task::yield_now().await;

        let conn = Arc::new(if self.fail_sends {
            RecordingConnection::failing()
        } else {
            RecordingConnection::default()
        });
        lock(&self.opened).push((url.clone(), conn.clone()));
        Ok(conn)
    }
}

/// Issues `tok-<username>`, or fails with [`Error::AuthTokenMissing`] when configured to.
#[derive(Debug, Default)]
pub struct FakeAuthenticator {
    calls: AtomicUsize,
    deny: bool,
}

impl FakeAuthenticator {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self, _endpoint: &str, credentials: &Credentials) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(Error::AuthTokenMissing);
        }
        Ok(format!(
            "tok-{}",
            credentials.username.as_deref().unwrap_or("anon")
        ))
    }
}
