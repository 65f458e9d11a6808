use tracing::{debug, error, info, warn};

use super::tiers::{TierReceiver, TierSender, tiers};
use crate::broker::{QueueConsumer, QueueProducer, RECV_RETRY_DELAY};
use crate::notification::{Message, now_nanos};
use crate::utils::error::{EngineError, Result};

/// Counts reported by a finished pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Records decoded and buffered by intake.
    pub accepted: u64,
    /// Records forwarded to the reporting topic.
    pub forwarded: u64,
    /// Processed records whose forward failed.
    pub dropped: u64,
}

/// Processing step of the drain: stamps `processed_on` and sends a copy to
/// the reporting topic.
pub struct Forwarder<P> {
    producer: P,
    reporting_topic: String,
}

impl<P: QueueProducer> Forwarder<P> {
    pub fn new(producer: P, reporting_topic: impl Into<String>) -> Self {
        Self {
            producer,
            reporting_topic: reporting_topic.into(),
        }
    }

    pub async fn process(&self, mut message: Message) -> Result<Message> {
        message.processed_on = now_nanos();

        let payload = message.encode().map_err(|e| self.forward_error(e))?;
        self.producer
            .send(&self.reporting_topic, payload)
            .await
            .map_err(|e| self.forward_error(e))?;
        Ok(message)
    }

    fn forward_error(&self, reason: impl ToString) -> EngineError {
        EngineError::Forward {
            topic: self.reporting_topic.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Feeds the tiers from `consumer` until it closes or the drain goes away.
///
/// Malformed payloads are logged and skipped. Returns how many records were
/// buffered.
pub async fn run_intake<C: QueueConsumer>(mut consumer: C, tiers: TierSender) -> u64 {
    let mut accepted = 0;
    loop {
        let delivery = match consumer.recv().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                info!(accepted, "intake source closed");
                return accepted;
            }
            Err(e) => {
                error!(error = %e, "intake consumer error");
                tokio::time::sleep(RECV_RETRY_DELAY).await;
                continue;
            }
        };

        let mut message = match Message::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "dropping malformed message"
                );
                continue;
            }
        };
        message.received_on = now_nanos();
        let kind = message.kind;

        if tiers.submit(message).await.is_err() {
            warn!("drain stopped, closing intake");
            return accepted;
        }
        accepted += 1;
        debug!(
            kind = kind.code(),
            topic = %delivery.topic,
            offset = delivery.offset,
            "message buffered"
        );
    }
}

/// Processes buffered messages in priority order until every tier is closed
/// and empty.
pub async fn run_drain<P: QueueProducer>(
    mut tiers: TierReceiver,
    forwarder: Forwarder<P>,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    while let Some(message) = tiers.next().await {
        let kind = message.kind;
        match forwarder.process(message).await {
            Ok(message) => {
                summary.forwarded += 1;
                debug!(
                    kind = kind.code(),
                    latency_ns = message.dispatch_latency_nanos(),
                    "message processed"
                );
            }
            Err(e) => {
                summary.dropped += 1;
                error!(kind = kind.code(), error = %e, "processed record lost");
            }
        }
    }
    summary
}

/// Intake and drain for one consumer process, each on its own task.
pub struct DispatchPipeline<C, P> {
    consumer: C,
    forwarder: Forwarder<P>,
    capacity: usize,
}

impl<C, P> DispatchPipeline<C, P>
where
    C: QueueConsumer + 'static,
    P: QueueProducer + 'static,
{
    pub fn new(consumer: C, producer: P, reporting_topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            consumer,
            forwarder: Forwarder::new(producer, reporting_topic),
            capacity,
        }
    }

    /// Runs until the source closes and every buffered message is drained.
    pub async fn run(self) -> DispatchSummary {
        let (sender, receiver) = tiers(self.capacity);
        info!(
            capacity = self.capacity,
            reporting_topic = %self.forwarder.reporting_topic,
            "Starting dispatch pipeline"
        );

        let intake = tokio::spawn(run_intake(self.consumer, sender));
        let drain = tokio::spawn(run_drain(receiver, self.forwarder));

        let accepted = intake.await.unwrap_or_else(|e| {
            error!(error = %e, "intake task failed");
            0
        });
        let summary = drain.await.unwrap_or_else(|e| {
            error!(error = %e, "drain task failed");
            DispatchSummary::default()
        });

        let summary = DispatchSummary { accepted, ..summary };
        info!(
            accepted = summary.accepted,
            forwarded = summary.forwarded,
            dropped = summary.dropped,
            "dispatch pipeline finished"
        );
        summary
    }
}
