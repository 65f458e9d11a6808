//! Broker access for the orchestration engine.
//!
//! Every engine component talks to the broker through three narrow traits:
//! [`BrokerAdmin`] for topic layout, [`QueueProducer`] for appends and
//! [`QueueConsumer`] for group reads. [`LocalBroker`] is the embedded,
//! sled-backed implementation; `transport::client` provides the remote one.

pub mod local;
pub mod topic;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::utils::error::Result;

pub use local::{LocalBroker, LocalConsumer};
pub use topic::{ClusterInfo, TopicLayout};

/// One record read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Topic administration. Callers bound each call with their own timeout.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Current layout of `name`, or `None` when the topic does not exist.
    async fn describe_topic(&self, name: &str) -> Result<Option<TopicLayout>>;

    async fn create_topic(&self, name: &str, partitions: u32, replication_factor: u16)
    -> Result<()>;

    async fn delete_topic(&self, name: &str) -> Result<()>;

    async fn cluster_info(&self) -> Result<ClusterInfo>;
}

#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Pause before reading again after a consumer error.
pub const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A group-scoped reader over one or more topics.
///
/// `recv` waits for the next record; `Ok(None)` means the source is closed
/// for good.
#[async_trait]
pub trait QueueConsumer: Send {
    async fn recv(&mut self) -> Result<Option<Delivery>>;
}

#[async_trait]
impl<T: BrokerAdmin + ?Sized> BrokerAdmin for Arc<T> {
    async fn describe_topic(&self, name: &str) -> Result<Option<TopicLayout>> {
        (**self).describe_topic(name).await
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<()> {
        (**self).create_topic(name, partitions, replication_factor).await
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        (**self).delete_topic(name).await
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        (**self).cluster_info().await
    }
}

#[async_trait]
impl<T: QueueProducer + ?Sized> QueueProducer for Arc<T> {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        (**self).send(topic, payload).await
    }
}
