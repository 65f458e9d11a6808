use super::message::{ClientMessage, ServerMessage};
use super::{ControlClient, RemoteConsumer, ServerContext, serve};
use crate::broker::{LocalBroker, QueueConsumer, QueueProducer};
use crate::config::{QueueDefinition, Settings};
use crate::notification::{Message, MessageType};
use crate::orchestrator::Orchestrator;
use crate::reporting::StatsHandle;
use crate::testing::message;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::Message as WsMessage;

struct Harness {
    url: String,
    broker: LocalBroker,
    orchestrator: Arc<Orchestrator<LocalBroker>>,
}

async fn start_server(config_path: &str) -> Harness {
    let broker = LocalBroker::temporary().unwrap();
    let orchestrator = Arc::new(Orchestrator::new(
        broker.clone(),
        &Settings::default(),
        StatsHandle::new(60),
    ));
    orchestrator.start().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let ctx = ServerContext {
        broker: broker.clone(),
        orchestrator: orchestrator.clone(),
        config_path: config_path.to_string(),
    };
    tokio::spawn(serve(listener, ctx));

    Harness {
        url,
        broker,
        orchestrator,
    }
}

fn definition(name: &str, partitions: u32, priority: u32) -> QueueDefinition {
    QueueDefinition {
        name: name.to_string(),
        partitions,
        priority,
    }
}

#[test]
fn test_client_message_wire_format() {
    let raw = json!({ "type": "register_consumer" }).to_string();
    assert_eq!(
        serde_json::from_str::<ClientMessage>(&raw).unwrap(),
        ClientMessage::RegisterConsumer
    );

    let raw = json!({ "type": "subscribe", "group": "g", "topics": ["t"] }).to_string();
    assert_eq!(
        serde_json::from_str::<ClientMessage>(&raw).unwrap(),
        ClientMessage::Subscribe {
            group: "g".to_string(),
            topics: vec!["t".to_string()],
            credit: 1
        }
    );

    let raw = json!({ "type": "reconfigure" }).to_string();
    assert_eq!(
        serde_json::from_str::<ClientMessage>(&raw).unwrap(),
        ClientMessage::Reconfigure { queues: None }
    );

    let raw = json!({
        "type": "reconfigure",
        "queues": [{ "name": "messaging_otp", "partitions": 4, "priority": 70 }]
    })
    .to_string();
    assert_eq!(
        serde_json::from_str::<ClientMessage>(&raw).unwrap(),
        ClientMessage::Reconfigure {
            queues: Some(vec![definition("messaging_otp", 4, 70)])
        }
    );
}

#[tokio::test]
async fn test_registration_reply_shape() {
    let harness = start_server("absent").await;
    let (mut ws, _) = connect_async(harness.url.as_str()).await.unwrap();

    let request = json!({ "type": "register_consumer" }).to_string();
    ws.send(WsMessage::Text(request.into())).await.unwrap();

    let Some(Ok(WsMessage::Text(reply))) = ws.next().await else {
        panic!("expected a text reply");
    };
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(
        reply,
        json!({
            "type": "registered",
            "result": "registered",
            "subscription_target": "messaging_otp",
            "reporting_queue": "messaging_reporting"
        })
    );
}

#[tokio::test]
async fn test_register_follows_weights() {
    let harness = start_server("absent").await;
    let client = ControlClient::connect(&harness.url).await.unwrap();

    let first = client.register().await.unwrap();
    assert_eq!(first.queue, "messaging_otp");
    assert_eq!(first.reporting_queue.as_deref(), Some("messaging_reporting"));
    assert_eq!(client.register().await.unwrap().queue, "messaging_trx");
    assert_eq!(harness.orchestrator.assignments()[0].consumers, 1);
}

#[tokio::test]
async fn test_health_includes_broker_info() {
    let harness = start_server("absent").await;
    let client = ControlClient::connect(&harness.url).await.unwrap();

    let report = client.health().await.unwrap();
    assert_eq!(report.status, "successful");
    assert_eq!(report.average_latency_ms, None);
    let info = report.broker_info.unwrap();
    assert_eq!(info.cluster_id, harness.broker.cluster_id());
    assert_eq!(info.topics.len(), 4);
}

#[tokio::test]
async fn test_reconfigure_with_inline_queues() {
    let harness = start_server("absent").await;
    let client = ControlClient::connect(&harness.url).await.unwrap();

    client
        .reconfigure(Some(vec![
            definition("messaging_otp", 5, 80),
            definition("messaging_cmp", 3, 20),
        ]))
        .await
        .unwrap();

    let queues = harness.orchestrator.queues();
    assert_eq!(queues.len(), 2);
    assert_eq!(queues[0].weight, 0.8);
    assert_eq!(harness.broker.topic("messaging_otp").unwrap().unwrap().partitions, 5);
}

#[tokio::test]
async fn test_invalid_reconfigure_keeps_old_queues() {
    let harness = start_server("absent").await;
    let client = ControlClient::connect(&harness.url).await.unwrap();

    let err = client
        .reconfigure(Some(vec![definition("messaging_otp", 3, 150)]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("priority 150"));
    assert_eq!(harness.orchestrator.queues(), Settings::default().orchestration.queues);

    // the connection is still usable afterwards
    assert!(client.health().await.is_ok());
}

#[tokio::test]
#[serial]
async fn test_reconfigure_reloads_config_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("herald.toml");
    std::fs::write(
        &path,
        r#"
            [[orchestration.queues]]
            name = "messaging_alerts"
            partitions = 2
            priority = 100
        "#,
    )
    .unwrap();

    let harness = start_server(path.to_str().unwrap()).await;
    let client = ControlClient::connect(&harness.url).await.unwrap();
    client.reconfigure(None).await.unwrap();

    assert_eq!(harness.orchestrator.queues().len(), 1);
    assert_eq!(client.register().await.unwrap().queue, "messaging_alerts");
    assert!(harness.broker.topic("messaging_alerts").unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_frame_is_answered_with_error() {
    let harness = start_server("absent").await;
    let (mut ws, _) = connect_async(harness.url.as_str()).await.unwrap();

    let frame = json!({ "type": "launch" }).to_string();
    ws.send(WsMessage::Text(frame.into())).await.unwrap();
    let Some(Ok(WsMessage::Text(reply))) = ws.next().await else {
        panic!("expected a text reply");
    };
    assert!(matches!(
        serde_json::from_str::<ServerMessage>(&reply).unwrap(),
        ServerMessage::Error { .. }
    ));
}

#[tokio::test]
async fn test_publish_and_subscribe_round_trip() {
    let harness = start_server("absent").await;
    let producer = ControlClient::connect(&harness.url).await.unwrap();
    let mut consumer = RemoteConsumer::subscribe(
        &harness.url,
        "message_dispatcher",
        vec!["messaging_trx".to_string()],
        8,
    )
    .await
    .unwrap();

    let sent = message(MessageType::Transactional, "receipt");
    producer
        .send("messaging_trx", sent.encode().unwrap())
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(5), consumer.recv())
        .await
        .expect("record pushed in time")
        .unwrap()
        .unwrap();
    assert_eq!(delivery.topic, "messaging_trx");
    assert_eq!(Message::decode(&delivery.payload).unwrap(), sent);
}

#[tokio::test]
async fn test_stalled_subscriber_claims_only_its_window() {
    let harness = start_server("absent").await;
    for i in 0..50 {
        let payload = message(MessageType::OneTimePassword, &format!("code {i}"))
            .encode()
            .unwrap();
        harness.broker.append("messaging_otp", &payload).unwrap();
    }

    let mut stalled = RemoteConsumer::subscribe(
        &harness.url,
        "message_dispatcher",
        vec!["messaging_otp".to_string()],
        4,
    )
    .await
    .unwrap();
    // read one record, then stop reading: its credit is never handed back
    tokio::time::timeout(Duration::from_secs(5), stalled.recv())
        .await
        .expect("first record in time")
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut member = harness
        .broker
        .subscribe("message_dispatcher", vec!["messaging_otp".to_string()]);
    let mut left = 0;
    while member.try_recv().unwrap().is_some() {
        left += 1;
    }
    assert_eq!(left, 46);
}

#[tokio::test]
async fn test_reading_grants_more_credit() {
    let harness = start_server("absent").await;
    for i in 0..6 {
        let payload = message(MessageType::Campaign, &format!("sale {i}"))
            .encode()
            .unwrap();
        harness.broker.append("messaging_cmp", &payload).unwrap();
    }

    let mut consumer = RemoteConsumer::subscribe(
        &harness.url,
        "message_dispatcher",
        vec!["messaging_cmp".to_string()],
        2,
    )
    .await
    .unwrap();

    let mut received = 0;
    while received < 6 {
        tokio::time::timeout(Duration::from_secs(5), consumer.recv())
            .await
            .expect("record in time")
            .unwrap()
            .unwrap();
        received += 1;
    }
    assert_eq!(received, 6);
}
