use super::{DispatchPipeline, Forwarder, run_drain, run_intake, tiers};
use crate::broker::{BrokerAdmin, LocalBroker, QueueConsumer};
use crate::notification::{Message, MessageType};
use crate::testing::{FailingConsumer, RecordingProducer, VecConsumer, message};
use std::time::Duration;

const REPORTING: &str = "messaging_reporting";

#[tokio::test]
async fn test_drain_empties_higher_tiers_first() {
    let (sender, receiver) = tiers(10);
    for i in 0..3 {
        sender.submit(message(MessageType::Campaign, &format!("cmp-{i}"))).await.unwrap();
        sender.submit(message(MessageType::Transactional, &format!("trx-{i}"))).await.unwrap();
        sender.submit(message(MessageType::OneTimePassword, &format!("otp-{i}"))).await.unwrap();
    }
    drop(sender);

    let producer = RecordingProducer::default();
    let summary = run_drain(receiver, Forwarder::new(producer.clone(), REPORTING)).await;
    assert_eq!(summary.forwarded, 9);

    let bodies: Vec<String> = producer.messages().into_iter().map(|m| m.message).collect();
    assert_eq!(
        bodies,
        vec!["otp-0", "otp-1", "otp-2", "trx-0", "trx-1", "trx-2", "cmp-0", "cmp-1", "cmp-2"]
    );
}

#[tokio::test]
async fn test_next_wakes_on_late_arrival() {
    let (sender, mut receiver) = tiers(4);
    let waiter = tokio::spawn(async move { receiver.next().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    sender.submit(message(MessageType::Campaign, "late")).await.unwrap();
    let got = waiter.await.unwrap().unwrap();
    assert_eq!(got.message, "late");
}

#[tokio::test]
async fn test_next_returns_none_once_closed_and_empty() {
    let (sender, mut receiver) = tiers(4);
    sender.submit(message(MessageType::Transactional, "last")).await.unwrap();
    drop(sender);

    assert_eq!(receiver.next().await.map(|m| m.message), Some("last".to_string()));
    assert!(receiver.next().await.is_none());
}

#[tokio::test]
async fn test_full_tier_blocks_intake() {
    let messages: Vec<Message> = (0..3)
        .map(|i| message(MessageType::OneTimePassword, &format!("otp-{i}")))
        .collect();
    let (sender, mut receiver) = tiers(1);
    let intake = tokio::spawn(run_intake(VecConsumer::of_messages(&messages), sender));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!intake.is_finished());
    assert_eq!(receiver.len(MessageType::OneTimePassword), 1);

    // other tiers are unaffected by the full one
    assert_eq!(receiver.len(MessageType::Campaign), 0);

    let mut drained = Vec::new();
    while let Some(message) = receiver.next().await {
        drained.push(message.message);
    }
    assert_eq!(drained, vec!["otp-0", "otp-1", "otp-2"]);
    assert_eq!(intake.await.unwrap(), 3);
}

#[tokio::test]
async fn test_intake_stamps_received_on() {
    let (sender, mut receiver) = tiers(4);
    let source = VecConsumer::of_messages(&[message(MessageType::Transactional, "receipt")]);
    assert_eq!(run_intake(source, sender).await, 1);

    let buffered = receiver.try_next().unwrap();
    assert!(buffered.received_on > 0);
    assert_eq!(buffered.processed_on, 0);
    assert!(receiver.is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_skipped() {
    let good = message(MessageType::OneTimePassword, "first").encode().unwrap();
    let also_good = message(MessageType::Campaign, "second").encode().unwrap();
    let source = VecConsumer::new(vec![good, b"{not json".to_vec(), also_good]);

    let producer = RecordingProducer::default();
    let summary = DispatchPipeline::new(source, producer.clone(), REPORTING, 8)
        .run()
        .await;

    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.forwarded, 2);
    let bodies: Vec<String> = producer.messages().into_iter().map(|m| m.message).collect();
    assert!(bodies.contains(&"first".to_string()));
    assert!(bodies.contains(&"second".to_string()));
}

#[tokio::test]
async fn test_forwarded_records_carry_all_timestamps() {
    let mut original = message(MessageType::Transactional, "receipt");
    original.created_on = 42;
    let producer = RecordingProducer::default();

    DispatchPipeline::new(VecConsumer::of_messages(&[original]), producer.clone(), REPORTING, 8)
        .run()
        .await;

    let sent = producer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, REPORTING);

    let record = Message::decode(&sent[0].1).unwrap();
    assert_eq!(record.created_on, 42);
    assert!(record.received_on > 0);
    assert!(record.processed_on >= record.received_on);
}

#[tokio::test]
async fn test_forward_failure_is_not_fatal() {
    let messages: Vec<Message> = (0..4)
        .map(|i| message(MessageType::Campaign, &format!("cmp-{i}")))
        .collect();

    let summary = DispatchPipeline::new(
        VecConsumer::of_messages(&messages),
        RecordingProducer::failing(),
        REPORTING,
        2,
    )
    .run()
    .await;

    assert_eq!(summary.accepted, 4);
    assert_eq!(summary.forwarded, 0);
    assert_eq!(summary.dropped, 4);
}

#[tokio::test]
async fn test_pipeline_over_local_broker() {
    let broker = LocalBroker::temporary().unwrap();
    broker.create_topic("messaging_otp", 2, 1).await.unwrap();
    broker.create_topic(REPORTING, 1, 1).await.unwrap();

    for i in 0..5 {
        let payload = message(MessageType::OneTimePassword, &format!("code {i}"))
            .encode()
            .unwrap();
        broker.append("messaging_otp", &payload).unwrap();
    }

    let source = broker.subscribe("message_dispatcher", vec!["messaging_otp".to_string()]);
    let pipeline = DispatchPipeline::new(source, broker.clone(), REPORTING, 4);
    let handle = tokio::spawn(pipeline.run());

    let mut reporting = broker.subscribe("message_stats", vec![REPORTING.to_string()]);
    let mut bodies = Vec::new();
    for _ in 0..5 {
        let delivery = tokio::time::timeout(Duration::from_secs(5), reporting.recv())
            .await
            .expect("reporting record in time")
            .unwrap()
            .unwrap();
        bodies.push(Message::decode(&delivery.payload).unwrap().message);
    }
    bodies.sort();
    assert_eq!(bodies, vec!["code 0", "code 1", "code 2", "code 3", "code 4"]);

    handle.abort();
}

#[tokio::test]
async fn test_intake_backs_off_after_consumer_errors() {
    let consumer = FailingConsumer::default();
    let (sender, _receiver) = tiers(4);

    let outcome = tokio::time::timeout(
        Duration::from_millis(350),
        run_intake(consumer.clone(), sender),
    )
    .await;
    assert!(outcome.is_err(), "intake keeps retrying");

    let calls = consumer.calls();
    assert!((2..=6).contains(&calls), "{calls} reads in 350ms");
}
