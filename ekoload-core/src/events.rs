use std::sync::Arc;
use std::time::Duration;

use ekoload_metrics::{CounterKind, Metrics};

use crate::error::{Error, ErrorKind};

/// Events a session reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A session began connecting.
    Started,
    /// A call step began.
    Request,
    /// A call frame was written. `status_code` is always 0: calls are not correlated
    /// with inbound frames.
    Response {
        latency: Duration,
        status_code: u16,
        session_id: Arc<str>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Event {
    pub fn error(err: &Error) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: Event) {
        (**self).emit(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// Feeds events into a shared [`Metrics`] registry.
#[derive(Debug, Clone, Default)]
pub struct StatsSink {
    metrics: Arc<Metrics>,
}

impl StatsSink {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

impl EventSink for StatsSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Started => self.metrics.increment(CounterKind::SessionsStarted),
            Event::Request => self.metrics.increment(CounterKind::Requests),
            Event::Response { latency, .. } => {
                self.metrics.increment(CounterKind::Responses);
                self.metrics.record_latency(latency);
            }
            Event::Error { kind, .. } => self.metrics.record_error(&kind.to_string()),
        }
    }
}
