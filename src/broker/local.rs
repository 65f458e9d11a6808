//! Embedded broker
//!
//! A partitioned, append-only log kept in `sled`:
//! - `__topics` maps topic name to its [`TopicLayout`] (JSON)
//! - `topic/<name>` holds the records, keyed by partition then offset
//! - `__cursors` holds the next offset to read per (topic, partition, group)
//!
//! Producers spread records over partitions round-robin. Consumers in the
//! same group share cursors, so each record is handed to exactly one of them;
//! a fresh group starts at the earliest offset. Cursors advance when a record
//! is claimed, before it is processed (at-most-once).
//!
//! Appends, topic changes and cursor claims are serialized by one mutex.
//! Waiting consumers are woken through a `Notify` on every append.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use super::topic::{
    ClusterInfo, TopicLayout, TopicSummary, cursor_key, data_tree_name, record_key, record_offset,
};
use super::{BrokerAdmin, Delivery, QueueConsumer, QueueProducer};
use crate::utils::error::{EngineError, Result};

const TOPICS_TREE: &str = "__topics";
const CURSORS_TREE: &str = "__cursors";
const CLUSTER_ID_KEY: &str = "cluster_id";

#[derive(Clone)]
pub struct LocalBroker {
    inner: Arc<Inner>,
}

struct Inner {
    db: sled::Db,
    topics: sled::Tree,
    cursors: sled::Tree,
    address: String,
    cluster_id: String,
    write_lock: Mutex<()>,
    next_partition: AtomicU32,
    arrivals: Notify,
}

impl LocalBroker {
    /// Opens (or creates) the broker storage at `path`.
    ///
    /// This is the engine's admin connection; failing here is fatal.
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path).map_err(|source| EngineError::BrokerConnect {
            address: path.to_string(),
            source,
        })?;
        let broker = Self::with_db(db, path)?;
        info!(path, cluster_id = %broker.cluster_id(), "embedded broker opened");
        Ok(broker)
    }

    /// A broker that lives only as long as the process. Used by tests.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|source| EngineError::BrokerConnect {
                address: "memory".to_string(),
                source,
            })?;
        Self::with_db(db, "memory")
    }

    fn with_db(db: sled::Db, address: &str) -> Result<Self> {
        let topics = db.open_tree(TOPICS_TREE)?;
        let cursors = db.open_tree(CURSORS_TREE)?;
        let cluster_id = match db.get(CLUSTER_ID_KEY)? {
            Some(id) => String::from_utf8_lossy(&id).into_owned(),
            None => {
                let id = Uuid::new_v4().to_string();
                db.insert(CLUSTER_ID_KEY, id.as_bytes())?;
                id
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                topics,
                cursors,
                address: address.to_string(),
                cluster_id,
                write_lock: Mutex::new(()),
                next_partition: AtomicU32::new(0),
                arrivals: Notify::new(),
            }),
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.inner.cluster_id
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn topic(&self, name: &str) -> Result<Option<TopicLayout>> {
        match self.inner.topics.get(name)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(EngineError::Decode),
            None => Ok(None),
        }
    }

    pub fn topics(&self) -> Result<Vec<TopicLayout>> {
        self.inner
            .topics
            .iter()
            .values()
            .map(|raw| serde_json::from_slice(&raw?).map_err(EngineError::Decode))
            .collect()
    }

    /// A consumer reading `topics` with the cursors of `group`.
    pub fn subscribe(&self, group: &str, topics: Vec<String>) -> LocalConsumer {
        LocalConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topics,
            cursor: 0,
        }
    }

    /// Appends `payload` to the next partition of `topic`.
    pub fn append(&self, topic: &str, payload: &[u8]) -> Result<(u32, u64)> {
        let (partition, offset) = {
            let _guard = self.lock();
            let layout = self
                .topic(topic)?
                .ok_or_else(|| EngineError::UnknownTopic(topic.to_string()))?;
            let partition =
                self.inner.next_partition.fetch_add(1, Ordering::Relaxed) % layout.partitions;

            let tree = self.inner.db.open_tree(data_tree_name(topic))?;
            let offset = match tree.scan_prefix(partition.to_be_bytes()).next_back() {
                Some(entry) => {
                    let (key, _) = entry?;
                    record_offset(&key).map_or(0, |last| last + 1)
                }
                None => 0,
            };
            tree.insert(&record_key(partition, offset)[..], payload)?;
            (partition, offset)
        };

        self.inner.arrivals.notify_waiters();
        debug!(topic, partition, offset, "record appended");
        Ok((partition, offset))
    }

    fn create(&self, name: &str, partitions: u32, replication_factor: u16) -> Result<()> {
        if partitions == 0 {
            return Err(EngineError::admin(
                "create_topic",
                name,
                "partition count must be positive",
            ));
        }

        let _guard = self.lock();
        if self.inner.topics.contains_key(name)? {
            return Err(EngineError::admin("create_topic", name, "topic already exists"));
        }
        let layout = TopicLayout::new(name, partitions, replication_factor);
        let raw =
            serde_json::to_vec(&layout).map_err(|e| EngineError::admin("create_topic", name, e))?;
        self.inner.topics.insert(name, raw)?;

        info!(topic = name, partitions, "topic created");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.lock();
        if self.inner.topics.remove(name)?.is_none() {
            return Err(EngineError::UnknownTopic(name.to_string()));
        }
        self.inner.db.drop_tree(data_tree_name(name))?;

        let prefix = format!("{name}/");
        let stale: Vec<_> = self
            .inner
            .cursors
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<std::result::Result<_, _>>()?;
        for key in stale {
            self.inner.cursors.remove(key)?;
        }

        info!(topic = name, "topic deleted");
        Ok(())
    }

    /// Hands out the record at `group`'s cursor on one partition, if any.
    fn claim(&self, group: &str, topic: &str, partition: u32) -> Result<Option<Delivery>> {
        let _guard = self.lock();
        if !self.inner.topics.contains_key(topic)? {
            return Ok(None);
        }

        let cursor = cursor_key(topic, partition, group);
        let offset = match self.inner.cursors.get(&cursor)? {
            Some(raw) => <[u8; 8]>::try_from(&raw[..]).map_or(0, u64::from_be_bytes),
            None => 0,
        };

        let tree = self.inner.db.open_tree(data_tree_name(topic))?;
        let Some(payload) = tree.get(&record_key(partition, offset)[..])? else {
            return Ok(None);
        };
        self.inner
            .cursors
            .insert(cursor.as_bytes(), &(offset + 1).to_be_bytes()[..])?;

        Ok(Some(Delivery {
            topic: topic.to_string(),
            partition,
            offset,
            payload: payload.to_vec(),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBroker")
            .field("address", &self.inner.address)
            .field("cluster_id", &self.inner.cluster_id)
            .finish()
    }
}

#[async_trait]
impl BrokerAdmin for LocalBroker {
    async fn describe_topic(&self, name: &str) -> Result<Option<TopicLayout>> {
        self.topic(name)
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<()> {
        self.create(name, partitions, replication_factor)
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.delete(name)
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        Ok(ClusterInfo {
            cluster_id: self.inner.cluster_id.clone(),
            broker_address: self.inner.address.clone(),
            topics: self.topics()?.iter().map(TopicSummary::from).collect(),
        })
    }
}

#[async_trait]
impl QueueProducer for LocalBroker {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.append(topic, &payload).map(|_| ())
    }
}

/// Group reader over a set of topics of a [`LocalBroker`].
///
/// Partitions are visited round-robin, starting after the one that produced
/// the previous record; within a partition records come in offset order.
/// Topics that do not exist yet are skipped until they appear.
#[derive(Debug)]
pub struct LocalConsumer {
    broker: LocalBroker,
    group: String,
    topics: Vec<String>,
    cursor: usize,
}

impl LocalConsumer {
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Claims the next available record without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Delivery>> {
        let mut slots = Vec::new();
        for topic in &self.topics {
            if let Some(layout) = self.broker.topic(topic)? {
                slots.extend((0..layout.partitions).map(|p| (topic.as_str(), p)));
            }
        }
        if slots.is_empty() {
            return Ok(None);
        }

        let start = self.cursor % slots.len();
        for step in 0..slots.len() {
            let idx = (start + step) % slots.len();
            let (topic, partition) = slots[idx];
            if let Some(delivery) = self.broker.claim(&self.group, topic, partition)? {
                self.cursor = idx + 1;
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl QueueConsumer for LocalConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        let broker = self.broker.clone();
        loop {
            // registered before scanning so an append in between still wakes us
            let arrival = broker.inner.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(delivery) = self.try_recv()? {
                return Ok(Some(delivery));
            }
            arrival.await;
        }
    }
}
