//! Errors raised by the orchestration engine.
//!
//! Every failure category has its own variant so callers can decide between
//! "log and continue" and "abort". Only [`EngineError::BrokerConnect`] and
//! configuration errors at startup are treated as fatal by the binary.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("couldn't connect to the broker at {address}: {source}")]
    BrokerConnect {
        address: String,
        #[source]
        source: sled::Error,
    },

    #[error("broker admin call `{operation}` on topic `{topic}` failed: {reason}")]
    BrokerAdmin {
        operation: &'static str,
        topic: String,
        reason: String,
    },

    #[error("broker admin call `{operation}` on topic `{topic}` timed out after {timeout:?}")]
    AdminTimeout {
        operation: &'static str,
        topic: String,
        timeout: Duration,
    },

    #[error("topic `{0}` does not exist")]
    UnknownTopic(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("malformed message payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("couldn't forward record to `{topic}`: {reason}")]
    Forward { topic: String, reason: String },

    #[error("no queues are configured for consumer assignment")]
    NoQueues,

    #[error("broker storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    pub(crate) fn admin(operation: &'static str, topic: &str, reason: impl ToString) -> Self {
        EngineError::BrokerAdmin {
            operation,
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}
