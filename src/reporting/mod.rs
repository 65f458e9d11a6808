//! The `reporting` module turns processed records into running delivery
//! statistics: average dispatch latency and approximate throughput.
//!
//! The aggregator task owns the consumer of the reporting topic and writes
//! into a shared [`StatsHandle`]; the health query reads snapshots from it.

pub mod aggregator;
pub mod window;

pub use aggregator::{ReportingAggregator, ReportingSample, StatsHandle, StatsSnapshot};
pub use window::SecondWindow;
