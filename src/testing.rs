//! Test doubles shared by the module test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{BrokerAdmin, ClusterInfo, Delivery, QueueConsumer, QueueProducer, TopicLayout};
use crate::notification::{Message, MessageType};
use crate::utils::error::{EngineError, Result};

pub(crate) fn message(kind: MessageType, body: &str) -> Message {
    Message::new("+18095550100", body, "acme", kind)
}

pub(crate) fn delivery(offset: u64, payload: Vec<u8>) -> Delivery {
    Delivery {
        topic: "test".to_string(),
        partition: 0,
        offset,
        payload,
    }
}

/// Replays a fixed list of deliveries, then reports the source closed.
pub(crate) struct VecConsumer {
    pending: VecDeque<Delivery>,
}

impl VecConsumer {
    pub(crate) fn new(payloads: Vec<Vec<u8>>) -> Self {
        let pending = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| delivery(i as u64, payload))
            .collect();
        Self { pending }
    }

    pub(crate) fn of_messages(messages: &[Message]) -> Self {
        Self::new(messages.iter().map(|m| m.encode().unwrap()).collect())
    }
}

#[async_trait]
impl QueueConsumer for VecConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        Ok(self.pending.pop_front())
    }
}

/// Fails every read and counts the attempts.
#[derive(Clone, Default)]
pub(crate) struct FailingConsumer {
    calls: Arc<AtomicUsize>,
}

impl FailingConsumer {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueConsumer for FailingConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::UnknownTopic("messaging_otp".to_string()))
    }
}

/// Keeps every sent record in memory.
#[derive(Clone, Default)]
pub(crate) struct RecordingProducer {
    sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail: bool,
}

impl RecordingProducer {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .map(|(_, payload)| Message::decode(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl QueueProducer for RecordingProducer {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail {
            return Err(EngineError::UnknownTopic(topic.to_string()));
        }
        self.sent.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

/// Wraps an admin and counts mutating calls; can fail or stall on one topic.
pub(crate) struct CountingAdmin<A> {
    pub(crate) inner: A,
    pub(crate) creates: AtomicUsize,
    pub(crate) deletes: AtomicUsize,
    pub(crate) fail_on: Option<String>,
    pub(crate) stall_on: Option<String>,
}

impl<A> CountingAdmin<A> {
    pub(crate) fn new(inner: A) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_on: None,
            stall_on: None,
        }
    }

    pub(crate) fn mutations(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }

    async fn gate(&self, operation: &'static str, topic: &str) -> Result<()> {
        if self.fail_on.as_deref() == Some(topic) {
            return Err(EngineError::admin(operation, topic, "injected failure"));
        }
        if self.stall_on.as_deref() == Some(topic) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl<A: BrokerAdmin> BrokerAdmin for CountingAdmin<A> {
    async fn describe_topic(&self, name: &str) -> Result<Option<TopicLayout>> {
        self.gate("describe_topic", name).await?;
        self.inner.describe_topic(name).await
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner
            .create_topic(name, partitions, replication_factor)
            .await
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_topic(name).await
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        self.inner.cluster_info().await
    }
}
