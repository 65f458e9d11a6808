//! JSON frames exchanged over the control WebSocket, tagged by `"type"`.

use serde::{Deserialize, Serialize};

use crate::config::QueueDefinition;
use crate::orchestrator::HealthReport;

fn default_window() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Appends `payload` to `topic`. Not answered.
    Publish { topic: String, payload: String },
    /// Starts a push stream of `message` frames read with `group`'s cursors.
    ///
    /// The server claims a record only against a credit: `credit` is the
    /// initial window, later `credit` frames add to it.
    Subscribe {
        group: String,
        topics: Vec<String>,
        #[serde(default = "default_window")]
        credit: u32,
    },
    /// Allows the connection's subscriptions `count` more records.
    Credit { count: u32 },
    RegisterConsumer,
    Health,
    /// Replaces the queue list; without `queues` the server reloads its
    /// configuration file.
    Reconfigure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queues: Option<Vec<QueueDefinition>>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Registered {
        result: String,
        subscription_target: String,
        /// Topic processed records must be forwarded to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reporting_queue: Option<String>,
    },
    Health(HealthReport),
    Status { status: String },
    Error { message: String },
    Message {
        topic: String,
        partition: u32,
        offset: u64,
        payload: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }
}
