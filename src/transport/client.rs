//! Clients of the control server: [`ControlClient`] for requests and
//! publishing, [`RemoteConsumer`] for a subscription's push stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::message::{ClientMessage, ServerMessage};
use crate::broker::{Delivery, QueueConsumer, QueueProducer};
use crate::config::QueueDefinition;
use crate::orchestrator::HealthReport;
use crate::utils::error::{EngineError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send_frame(stream: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(message)
        .map_err(|e| EngineError::Protocol(format!("couldn't encode request: {e}")))?;
    stream.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

/// Next server frame, or `None` once the connection is closed.
async fn next_frame(stream: &mut WsStream) -> Result<Option<ServerMessage>> {
    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) => match serde_json::from_str(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!(error = %e, "ignoring unreadable server frame"),
            },
            WsMessage::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

fn unexpected(reply: ServerMessage) -> EngineError {
    match reply {
        ServerMessage::Error { message } => EngineError::Protocol(message),
        other => EngineError::Protocol(format!("unexpected reply: {other:?}")),
    }
}

/// Answer to a consumer registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Queue the consumer should subscribe to.
    pub queue: String,
    /// Reporting topic of the server, when it announces one.
    pub reporting_queue: Option<String>,
}

/// Request/response connection to the control server.
///
/// Requests are serialized over one socket; publishing is fire-and-forget.
pub struct ControlClient {
    stream: Mutex<WsStream>,
}

impl ControlClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = connect_async(url).await?;
        debug!(url, "connected to control server");
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    async fn request(&self, message: &ClientMessage) -> Result<ServerMessage> {
        let mut stream = self.stream.lock().await;
        send_frame(&mut stream, message).await?;
        next_frame(&mut stream)
            .await?
            .ok_or_else(|| EngineError::Protocol("connection closed before reply".into()))
    }

    /// Asks the balancer for this consumer's queue.
    pub async fn register(&self) -> Result<Registration> {
        match self.request(&ClientMessage::RegisterConsumer).await? {
            ServerMessage::Registered {
                subscription_target,
                reporting_queue,
                ..
            } => Ok(Registration {
                queue: subscription_target,
                reporting_queue,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn health(&self) -> Result<HealthReport> {
        match self.request(&ClientMessage::Health).await? {
            ServerMessage::Health(report) => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    /// Replaces the queue list, or makes the server reload its configuration
    /// when `queues` is `None`.
    pub async fn reconfigure(&self, queues: Option<Vec<QueueDefinition>>) -> Result<()> {
        match self.request(&ClientMessage::Reconfigure { queues }).await? {
            ServerMessage::Status { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        let mut stream = self.stream.lock().await;
        send_frame(
            &mut stream,
            &ClientMessage::Publish {
                topic: topic.to_string(),
                payload,
            },
        )
        .await
    }
}

#[async_trait]
impl QueueProducer for ControlClient {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let payload = String::from_utf8(payload)
            .map_err(|e| EngineError::Protocol(format!("payload is not UTF-8: {e}")))?;
        self.publish(topic, payload).await
    }
}

/// A subscription on the control server, read as a [`QueueConsumer`].
///
/// At most `window` records are claimed ahead of the caller. A record's
/// credit is handed back on the next `recv`, so a caller that stops reading
/// (for instance because its tier buffer is full) stops the server from
/// claiming more.
pub struct RemoteConsumer {
    stream: WsStream,
    owed: u32,
    closed: bool,
}

impl RemoteConsumer {
    pub async fn subscribe(
        url: &str,
        group: &str,
        topics: Vec<String>,
        window: u32,
    ) -> Result<Self> {
        let (mut stream, _response) = connect_async(url).await?;
        send_frame(
            &mut stream,
            &ClientMessage::Subscribe {
                group: group.to_string(),
                topics,
                credit: window.max(1),
            },
        )
        .await?;
        Ok(Self {
            stream,
            owed: 0,
            closed: false,
        })
    }
}

#[async_trait]
impl QueueConsumer for RemoteConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        if self.closed {
            return Ok(None);
        }
        if self.owed > 0 {
            let count = std::mem::take(&mut self.owed);
            if let Err(e) = send_frame(&mut self.stream, &ClientMessage::Credit { count }).await {
                self.closed = true;
                return Err(e);
            }
        }
        loop {
            let frame = match next_frame(&mut self.stream).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.closed = true;
                    return Err(e);
                }
            };

            match frame {
                ServerMessage::Message {
                    topic,
                    partition,
                    offset,
                    payload,
                } => {
                    self.owed += 1;
                    return Ok(Some(Delivery {
                        topic,
                        partition,
                        offset,
                        payload: payload.into_bytes(),
                    }));
                }
                ServerMessage::Error { message } => warn!(%message, "subscription error"),
                other => debug!(?other, "ignoring frame on subscription"),
            }
        }
    }
}
