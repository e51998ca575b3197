pub mod histogram;
pub mod registry;

pub use histogram::HistogramSummary;
pub use registry::{Counter, CounterKind, Metrics, MetricsSummary};
