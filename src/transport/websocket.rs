//! WebSocket control server
//!
//! Hosts the broker and the orchestration engine for out-of-process
//! producers and consumers. Each connection gets its own send loop fed by a
//! channel, so replies never block the reader. Subscriptions run as separate
//! tasks and are aborted when the connection goes away.
//!
//! Subscriptions are credit based: a record is claimed from the broker only
//! against a credit granted by the client, so a consumer that stops reading
//! stops advancing its group's cursors and leaves the backlog to the other
//! members of the group.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::message::{ClientMessage, ServerMessage};
use crate::broker::{LocalBroker, QueueConsumer};
use crate::config::{ConfigError, QueueSpec, load_config_from};
use crate::orchestrator::Orchestrator;
use crate::utils::error::Result;

/// Everything a connection handler needs, shared by all connections.
#[derive(Clone)]
pub struct ServerContext {
    pub broker: LocalBroker,
    pub orchestrator: Arc<Orchestrator<LocalBroker>>,
    /// Configuration file re-read by a `reconfigure` request without queues.
    pub config_path: String,
}

impl ServerContext {
    /// Queue list from a fresh read of the configuration file.
    fn reload_queues(&self) -> std::result::Result<Vec<QueueSpec>, ConfigError> {
        let settings = load_config_from(&self.config_path)?;
        let reporting_queue = self.orchestrator.reporting_queue();
        if settings.orchestration.reporting_queue != reporting_queue {
            warn!(
                configured = %settings.orchestration.reporting_queue,
                active = %reporting_queue,
                "reporting queue changes need a restart, keeping the active one"
            );
        }
        if let Some(clash) = settings
            .orchestration
            .queues
            .iter()
            .find(|q| q.name == reporting_queue)
        {
            return Err(ConfigError::Invalid(format!(
                "queue `{}` collides with the reporting queue",
                clash.name
            )));
        }
        Ok(settings.orchestration.queues)
    }
}

pub async fn start_control_server(addr: &str, ctx: ServerContext) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Control server listening on ws://{}", listener.local_addr()?);
    serve(listener, ctx).await;
    Ok(())
}

/// Accepts connections on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, ctx: ServerContext) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                tokio::spawn(handle_connection(stream, ctx.clone()));
            }
            Err(e) => {
                error!(error = %e, "couldn't accept connection");
                return;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: ServerContext) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake error");
            return;
        }
    };
    let client_id = format!("client-{}", Uuid::new_v4());
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    {
        let client_id = client_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(%client_id, error = %e, "failed to send frame");
                    break;
                }
            }
            debug!(%client_id, "send loop closed");
        });
    }

    let credits = Arc::new(Semaphore::new(0));
    let mut subscriptions = Vec::new();
    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(%client_id, error = %e, "connection error");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(request) => {
                if let Some(task) = handle_request(&ctx, &client_id, request, &tx, &credits).await {
                    subscriptions.push(task);
                }
            }
            Err(e) => {
                warn!(
                    %client_id,
                    error = %e,
                    frame = %text.chars().take(100).collect::<String>(),
                    "invalid client message"
                );
                reply(&tx, &ServerMessage::error(format!("invalid message: {e}")));
            }
        }
    }

    for task in subscriptions {
        task.abort();
    }
    info!(%client_id, "client disconnected");
}

/// Serves one request. Returns the push task a subscription started.
async fn handle_request(
    ctx: &ServerContext,
    client_id: &str,
    request: ClientMessage,
    tx: &UnboundedSender<WsMessage>,
    credits: &Arc<Semaphore>,
) -> Option<JoinHandle<()>> {
    match request {
        ClientMessage::Publish { topic, payload } => {
            match ctx.broker.append(&topic, payload.as_bytes()) {
                Ok((partition, offset)) => {
                    debug!(client_id, %topic, partition, offset, "published");
                }
                Err(e) => warn!(client_id, %topic, error = %e, "publish rejected"),
            }
        }
        ClientMessage::Subscribe {
            group,
            topics,
            credit,
        } => {
            info!(client_id, %group, ?topics, credit, "subscribed");
            grant(credits, credit);
            let consumer = ctx.broker.subscribe(&group, topics);
            return Some(tokio::spawn(push_records(
                consumer,
                credits.clone(),
                tx.clone(),
            )));
        }
        ClientMessage::Credit { count } => grant(credits, count),
        ClientMessage::RegisterConsumer => {
            let response = match ctx.orchestrator.register_consumer() {
                Ok(queue) => ServerMessage::Registered {
                    result: "registered".to_string(),
                    subscription_target: queue,
                    reporting_queue: Some(ctx.orchestrator.reporting_queue()),
                },
                Err(e) => {
                    error!(client_id, error = %e, "couldn't register consumer");
                    ServerMessage::error(e)
                }
            };
            reply(tx, &response);
        }
        ClientMessage::Health => {
            reply(tx, &ServerMessage::Health(ctx.orchestrator.health().await));
        }
        ClientMessage::Reconfigure { queues } => {
            let specs = match queues {
                Some(definitions) => ctx.orchestrator.validate(definitions),
                None => ctx.reload_queues(),
            };
            let response = match specs {
                Ok(specs) => {
                    let report = ctx.orchestrator.reconfigure(specs).await;
                    if report.is_clean() {
                        ServerMessage::Status {
                            status: "successful".to_string(),
                        }
                    } else {
                        ServerMessage::error(format!(
                            "couldn't reconcile topics: {}",
                            report.failed.join(", ")
                        ))
                    }
                }
                Err(e) => {
                    warn!(client_id, error = %e, "reconfiguration rejected");
                    ServerMessage::error(e)
                }
            };
            reply(tx, &response);
        }
    }
    None
}

fn grant(credits: &Semaphore, count: u32) {
    let room = Semaphore::MAX_PERMITS - credits.available_permits();
    credits.add_permits((count as usize).min(room));
}

/// Claims and pushes one record per credit until the connection or the
/// source goes away.
async fn push_records<C: QueueConsumer>(
    mut consumer: C,
    credits: Arc<Semaphore>,
    tx: UnboundedSender<WsMessage>,
) {
    loop {
        match credits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }
        match consumer.recv().await {
            Ok(Some(delivery)) => {
                let frame = ServerMessage::Message {
                    topic: delivery.topic,
                    partition: delivery.partition,
                    offset: delivery.offset,
                    payload: String::from_utf8_lossy(&delivery.payload).into_owned(),
                };
                if !reply(&tx, &frame) {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "subscription stopped");
                reply(&tx, &ServerMessage::error(e));
                return;
            }
        }
    }
}

/// Queues `message` on the connection's send loop. False once it is gone.
fn reply(tx: &UnboundedSender<WsMessage>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => tx.send(WsMessage::Text(json.into())).is_ok(),
        Err(e) => {
            error!(error = %e, "couldn't encode server message");
            true
        }
    }
}
