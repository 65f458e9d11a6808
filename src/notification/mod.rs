//! Notification records carried between broker topics.
//!
//! `Message` is the canonical wire representation. Producers stamp
//! `created_on`; the dispatch pipeline stamps `received_on` when it pulls the
//! record off a queue and `processed_on` once the record leaves its tier.
//! All three are nanoseconds since the UNIX epoch. On the wire the type is the
//! short code (`OTP`, `TRX`, `CMP`).

use serde::{Deserialize, Serialize};

use crate::utils::error::{EngineError, Result};

/// Kind of notification. Declaration order is dispatch priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "OTP", alias = "OneTimePassword")]
    OneTimePassword,
    #[serde(rename = "TRX", alias = "Transactional")]
    Transactional,
    #[serde(rename = "CMP", alias = "Campaign")]
    Campaign,
}

impl MessageType {
    /// All kinds, highest priority first.
    pub const BY_PRIORITY: [MessageType; 3] = [
        MessageType::OneTimePassword,
        MessageType::Transactional,
        MessageType::Campaign,
    ];

    /// Zero-based tier index; 0 is drained first.
    pub fn tier(self) -> usize {
        match self {
            MessageType::OneTimePassword => 0,
            MessageType::Transactional => 1,
            MessageType::Campaign => 2,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            MessageType::OneTimePassword => "OTP",
            MessageType::Transactional => "TRX",
            MessageType::Campaign => "CMP",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "OTP" | "otp" | "OneTimePassword" => Ok(MessageType::OneTimePassword),
            "TRX" | "trx" | "Transactional" => Ok(MessageType::Transactional),
            "CMP" | "cmp" | "Campaign" => Ok(MessageType::Campaign),
            other => Err(format!("unknown message type `{other}` (expected OTP, TRX or CMP)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub recipient: String,
    pub message: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub received_on: i64,
    #[serde(default)]
    pub processed_on: i64,
}

impl Message {
    pub fn new(
        recipient: impl Into<String>,
        message: impl Into<String>,
        sender: impl Into<String>,
        kind: MessageType,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            message: message.into(),
            sender: sender.into(),
            kind,
            created_on: 0,
            received_on: 0,
            processed_on: 0,
        }
    }

    /// Rejects messages missing a recipient, body or sender.
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("recipient", &self.recipient),
            ("message", &self.message),
            ("sender", &self.sender),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::InvalidMessage(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(EngineError::Decode)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Time spent between intake and processing, in nanoseconds.
    pub fn dispatch_latency_nanos(&self) -> i64 {
        self.processed_on - self.received_on
    }
}

/// Current wall-clock time in nanoseconds since the UNIX epoch.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
