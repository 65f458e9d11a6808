//! Topic layout and record keys
//!
//! Each topic lives in its own sled tree. Record keys are the partition
//! (`u32`, big endian) followed by the offset (`u64`, big endian), so a
//! prefix scan over the partition yields its records in offset order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicLayout {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
}

impl TopicLayout {
    pub fn new(name: &str, partitions: u32, replication_factor: u16) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            replication_factor,
        }
    }
}

/// Broker metadata surfaced through the health query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub broker_address: String,
    pub topics: Vec<TopicSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub name: String,
    pub partitions: u32,
}

impl From<&TopicLayout> for TopicSummary {
    fn from(layout: &TopicLayout) -> Self {
        Self {
            name: layout.name.clone(),
            partitions: layout.partitions,
        }
    }
}

pub(crate) fn data_tree_name(topic: &str) -> String {
    format!("topic/{topic}")
}

pub(crate) fn record_key(partition: u32, offset: u64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&partition.to_be_bytes());
    key[4..].copy_from_slice(&offset.to_be_bytes());
    key
}

/// Offset encoded in a record key, if the key is well formed.
pub(crate) fn record_offset(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(4..12)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Committed-offset key for one group on one partition. Prefixed by topic so
/// deleting a topic can drop every group's cursor with one scan.
pub(crate) fn cursor_key(topic: &str, partition: u32, group: &str) -> String {
    format!("{topic}/{partition}/{group}")
}
