//! Producer-side routing.
//!
//! A [`MessageRouter`] maps each [`MessageType`] to the topics its messages
//! are published to, as configured under `routing`. Publishing stamps
//! `created_on` and fans the encoded record out to every target; a failing
//! target is logged and skipped.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::broker::QueueProducer;
use crate::config::RouteSettings;
use crate::notification::{Message, MessageType, now_nanos};
use crate::utils::error::{EngineError, Result};

#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    routes: HashMap<MessageType, Vec<String>>,
}

impl MessageRouter {
    /// Repeated entries for the same type add to its targets.
    pub fn from_settings(routes: &[RouteSettings]) -> Self {
        let mut table: HashMap<MessageType, Vec<String>> = HashMap::new();
        for route in routes {
            let targets = table.entry(route.context).or_default();
            for target in &route.targets {
                if !targets.contains(target) {
                    targets.push(target.clone());
                }
            }
        }
        Self { routes: table }
    }

    pub fn targets(&self, kind: MessageType) -> &[String] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Validates, stamps and publishes `message` to every target of its type.
    ///
    /// Returns the stamped message and how many targets accepted it.
    pub async fn publish<P>(&self, producer: &P, mut message: Message) -> Result<(Message, usize)>
    where
        P: QueueProducer + ?Sized,
    {
        message.validate()?;
        message.created_on = now_nanos();

        let targets = self.targets(message.kind);
        if targets.is_empty() {
            warn!(kind = message.kind.code(), "no route configured, message not published");
            return Ok((message, 0));
        }

        let payload = message.encode().map_err(|e| EngineError::Forward {
            topic: targets.join(","),
            reason: e.to_string(),
        })?;

        let mut delivered = 0;
        for target in targets {
            match producer.send(target, payload.clone()).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(topic = %target, kind = message.kind.code(), "message published");
                }
                Err(e) => error!(topic = %target, error = %e, "couldn't publish message"),
            }
        }
        Ok((message, delivered))
    }
}
