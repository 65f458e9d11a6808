use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::window::SecondWindow;
use crate::broker::{QueueConsumer, RECV_RETRY_DELAY};
use crate::notification::Message;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Running totals over every processed record seen by this instance.
#[derive(Debug, Clone)]
pub struct ReportingSample {
    latency_sum_ns: i128,
    count: u64,
    per_second: SecondWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub average_latency_ms: Option<f64>,
    pub approx_throughput: Option<f64>,
}

impl ReportingSample {
    pub fn new(window_secs: usize) -> Self {
        Self {
            latency_sum_ns: 0,
            count: 0,
            per_second: SecondWindow::new(window_secs),
        }
    }

    pub fn record(&mut self, message: &Message) {
        self.latency_sum_ns += i128::from(message.dispatch_latency_nanos());
        self.count += 1;
        self.per_second
            .record(message.received_on.div_euclid(NANOS_PER_SEC));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.count,
            average_latency_ms: (self.count > 0)
                .then(|| self.latency_sum_ns as f64 / self.count as f64 / 1e6),
            approx_throughput: self.per_second.mean(),
        }
    }
}

/// Shared handle to one instance's [`ReportingSample`].
#[derive(Debug, Clone)]
pub struct StatsHandle {
    sample: Arc<Mutex<ReportingSample>>,
}

impl StatsHandle {
    pub fn new(window_secs: usize) -> Self {
        Self {
            sample: Arc::new(Mutex::new(ReportingSample::new(window_secs))),
        }
    }

    pub fn record(&self, message: &Message) {
        self.lock().record(message);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, ReportingSample> {
        self.sample.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumes the reporting topic into a [`StatsHandle`].
pub struct ReportingAggregator<C> {
    consumer: C,
    stats: StatsHandle,
}

impl<C: QueueConsumer> ReportingAggregator<C> {
    pub fn new(consumer: C, stats: StatsHandle) -> Self {
        Self { consumer, stats }
    }

    /// Runs until the source closes. Returns the number of records counted.
    pub async fn run(mut self) -> u64 {
        info!("Started consuming reporting records");
        let mut counted = 0;
        loop {
            match self.consumer.recv().await {
                Ok(Some(delivery)) => match Message::decode(&delivery.payload) {
                    Ok(message) => {
                        self.stats.record(&message);
                        counted += 1;
                        debug!(
                            latency_ns = message.dispatch_latency_nanos(),
                            kind = message.kind.code(),
                            "reporting record counted"
                        );
                    }
                    Err(e) => warn!(
                        topic = %delivery.topic,
                        offset = delivery.offset,
                        error = %e,
                        "dropping malformed reporting record"
                    ),
                },
                Ok(None) => {
                    info!(counted, "reporting source closed");
                    return counted;
                }
                Err(e) => {
                    error!(error = %e, "reporting consumer error");
                    tokio::time::sleep(RECV_RETRY_DELAY).await;
                }
            }
        }
    }
}
