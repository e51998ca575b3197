use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use strum::IntoEnumIterator as _;

use crate::histogram::{HistogramSummary, LatencyHistogram};

/// Fixed counters tracked for every run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::EnumCount,
)]
#[strum(serialize_all = "snake_case")]
pub enum CounterKind {
    SessionsStarted,
    Requests,
    Responses,
    Errors,
}

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    counters: [Counter; <CounterKind as strum::EnumCount>::COUNT],
    latency: LatencyHistogram,
    errors: DashMap<String, AtomicU64>,
}

impl Metrics {
    pub fn counter(&self, kind: CounterKind) -> &Counter {
        &self.counters[kind as usize]
    }

    pub fn increment(&self, kind: CounterKind) {
        self.counter(kind).increment(1);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latency.record(latency);
    }

    /// Counts one error under `kind` and bumps the total error counter.
    pub fn record_error(&self, kind: &str) {
        self.increment(CounterKind::Errors);

        if let Some(existing) = self.errors.get(kind) {
            existing.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.errors
            .entry(kind.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn summarize(&self) -> MetricsSummary {
        let counters = CounterKind::iter()
            .map(|k| (k.to_string(), self.counter(k).get()))
            .collect();

        let errors = self
            .errors
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSummary {
            counters,
            latency_us: self.latency.summarize(),
            errors,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub counters: BTreeMap<String, u64>,
    pub latency_us: HistogramSummary,
    pub errors: BTreeMap<String, u64>,
}

impl MetricsSummary {
    pub fn counter(&self, kind: CounterKind) -> u64 {
        self.counters.get(&kind.to_string()).copied().unwrap_or(0)
    }

    pub fn errors_of(&self, kind: &str) -> u64 {
        self.errors.get(kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let m = Metrics::default();
        m.increment(CounterKind::Requests);
        m.increment(CounterKind::Requests);
        m.increment(CounterKind::Responses);

        let s = m.summarize();
        assert_eq!(s.counter(CounterKind::Requests), 2);
        assert_eq!(s.counter(CounterKind::Responses), 1);
        assert_eq!(s.counter(CounterKind::SessionsStarted), 0);
    }

    #[test]
    fn errors_are_tallied_per_kind() {
        let m = Metrics::default();
        m.record_error("send");
        m.record_error("connection");
        m.record_error("send");

        let s = m.summarize();
        assert_eq!(s.errors_of("send"), 2);
        assert_eq!(s.errors_of("connection"), 1);
        assert_eq!(s.errors_of("auth_token_missing"), 0);
        assert_eq!(s.counter(CounterKind::Errors), 3);
    }

    #[test]
    fn summary_serializes_with_snake_case_counter_names() {
        let m = Metrics::default();
        m.increment(CounterKind::SessionsStarted);
        m.record_latency(Duration::from_millis(1));

        let json = serde_json::to_value(m.summarize()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(json["counters"]["sessions_started"], 1);
        assert_eq!(json["latency_us"]["count"], 1);
    }
}
