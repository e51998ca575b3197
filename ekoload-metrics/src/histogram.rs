use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

/// Latency quantiles, in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub count: u64,
}

#[derive(Debug)]
pub struct LatencyHistogram {
    inner: Mutex<Histogram<u64>>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            inner: Mutex::new(new_default_histogram()),
        }
    }
}

impl LatencyHistogram {
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX).max(1);
        // Out-of-range samples saturate at the configured upper bound.
        self.inner.lock().saturating_record(micros);
    }

    pub fn summarize(&self) -> HistogramSummary {
        summarize_histogram(&self.inner.lock())
    }
}

fn new_default_histogram() -> Histogram<u64> {
    // Microseconds, upper bound: 1 hour.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

fn summarize_histogram(h: &Histogram<u64>) -> HistogramSummary {
    let count = h.len();
    let map_val = |v| v as f64;

    HistogramSummary {
        p50: (count > 0).then(|| map_val(h.value_at_quantile(0.50))),
        p90: (count > 0).then(|| map_val(h.value_at_quantile(0.90))),
        p95: (count > 0).then(|| map_val(h.value_at_quantile(0.95))),
        p99: (count > 0).then(|| map_val(h.value_at_quantile(0.99))),
        min: (count > 0).then(|| map_val(h.min())),
        max: (count > 0).then(|| map_val(h.max())),
        mean: (count > 0).then(|| h.mean()),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_quantiles() {
        let h = LatencyHistogram::default();
        let s = h.summarize();
        assert_eq!(s.count, 0);
        assert_eq!(s.p50, None);
        assert_eq!(s.max, None);
    }

    #[test]
    fn records_in_microseconds() {
        let h = LatencyHistogram::default();
        h.record(Duration::from_millis(2));
        h.record(Duration::from_millis(4));
        h.record(Duration::from_nanos(10));

        let s = h.summarize();
        assert_eq!(s.count, 3);
        assert_eq!(s.min, Some(1.0));
        let max = s.max.unwrap_or_default();
        assert!((3_990.0..=4_010.0).contains(&max), "max={max}");
    }
}
