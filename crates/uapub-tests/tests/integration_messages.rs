// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Message Integration Tests
//!
//! What reaches the message client, and when:
//!
//! - Batch flush laws
//! - Samples and pub/sub payload shapes, binary encoding
//! - Heartbeats
//! - Restart announcement
//! - Bounded egress with oldest-first eviction
//!
//! ## Test Categories
//!
//! - `test_batch_*`: flush timing through a running engine
//! - `test_payload_*`: message shapes
//! - `test_restart_*`: runtime state reporting
//! - `test_egress_*`: queue and sender

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use uapub_buffer::{EgressQueue, EgressSender, SenderConfig};
use uapub_core::message::{CONTENT_TYPE_JSON, CONTENT_TYPE_UA_BINARY, ROUTING_RUNTIME_INFO};
use uapub_core::{
    EngineConfiguration, MessageEncoding, MessagingMode, MockMessageClient, NetworkMessage,
    OpcNodeModel, PublishedNodesEntry, ReportOutcome, WriterId,
};

use uapub_tests::common::{
    assert_data_message, json_body, samples, values_for, EndpointFixtures, EngineHarness,
    NodeFixtures,
};

const PRESS: &str = EndpointFixtures::PRESS;

fn press_entry(count: usize) -> PublishedNodesEntry {
    let tags = NodeFixtures::tags(count);
    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    NodeFixtures::entry(PRESS, &tags)
}

fn data_message(writer: &str, text: &'static str) -> NetworkMessage {
    NetworkMessage::data(
        WriterId::new(writer),
        Bytes::from_static(text.as_bytes()),
        MessageEncoding::Json,
        MessagingMode::Samples,
        1,
    )
}

// =============================================================================
// Batch Flush Laws
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_full_flushes_immediately() {
    let harness = EngineHarness::with_batch_size(50);
    harness.publish(&press_entry(50)).await;

    for (i, tag) in NodeFixtures::tags(50).iter().enumerate() {
        harness.change(PRESS, &NodeFixtures::node(tag), i as f64);
    }
    harness.settle(Duration::from_millis(20)).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(samples(&sent).len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_batch_partial_flushes_after_trigger_interval() {
    let harness = EngineHarness::with_batch_size(50);
    harness.publish(&press_entry(10)).await;

    for tag in NodeFixtures::tags(10) {
        harness.change(PRESS, &NodeFixtures::node(&tag), 1.0);
    }
    harness.settle(Duration::from_millis(300)).await;
    assert_eq!(harness.client.sent_count(), 0);

    harness.settle(Duration::from_millis(300)).await;
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(samples(&sent).len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_batch_empty_never_flushes() {
    let harness = EngineHarness::with_batch_size(50);
    harness.publish(&press_entry(3)).await;

    harness.settle(Duration::from_secs(5)).await;
    assert_eq!(harness.client.sent_count(), 0);
}

// =============================================================================
// Payload Shapes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_payload_samples_shape() {
    let harness = EngineHarness::with_batch_size(2);
    let entry = PublishedNodesEntry::new(PRESS)
        .with_writer_id("press")
        .with_node(OpcNodeModel::new(NodeFixtures::id("Force")).with_display_name("Force"))
        .with_node(OpcNodeModel::new(NodeFixtures::id("Stroke")));
    harness.publish(&entry).await;

    harness.change(PRESS, &NodeFixtures::node("Force"), 120.5);
    harness.change(PRESS, &NodeFixtures::node("Stroke"), 42.0);
    harness.settle(Duration::from_millis(50)).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_data_message(&sent[0], "press");
    assert_eq!(sent[0].content_type.as_deref(), Some(CONTENT_TYPE_JSON));

    let body = json_body(&sent[0]);
    assert_eq!(body[0]["NodeId"], NodeFixtures::id("Force"));
    assert_eq!(body[0]["DisplayName"], "Force");
    assert_eq!(body[0]["DataSetWriterId"], "press");
    assert_eq!(body[0]["Value"]["Value"], 120.5);
    assert!(body[0]["Value"]["SourceTimestamp"].is_string());
    assert!(body[0].get("IsHeartbeat").is_none());
    assert_eq!(body[1]["DisplayName"], NodeFixtures::id("Stroke"));
}

#[tokio::test(start_paused = true)]
async fn test_payload_pub_sub_shape() {
    let harness = EngineHarness::with_config(EngineConfiguration {
        batch_size: 2,
        messaging_mode: MessagingMode::PubSub,
        ..EngineConfiguration::for_testing()
    });
    let entry = PublishedNodesEntry::new(PRESS)
        .with_writer_id("press")
        .with_node(OpcNodeModel::new(NodeFixtures::id("Force")).with_display_name("Force"));
    harness.publish(&entry).await;

    harness.change(PRESS, &NodeFixtures::node("Force"), 1.0);
    harness.change(PRESS, &NodeFixtures::node("Force"), 2.0);
    harness.settle(Duration::from_millis(50)).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_data_message(&sent[0], "press");

    let body = json_body(&sent[0]);
    assert_eq!(body["MessageType"], "ua-data");
    let messages = body["Messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["DataSetWriterId"], "press");
    assert_eq!(messages[0]["Payload"]["Force"]["Value"], 1.0);
    assert_eq!(messages[1]["Payload"]["Force"]["Value"], 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_payload_binary_encoding() {
    let harness = EngineHarness::with_config(EngineConfiguration {
        batch_size: 1,
        message_encoding: MessageEncoding::Binary,
        ..EngineConfiguration::for_testing()
    });
    harness
        .publish(&NodeFixtures::entry(PRESS, &["Force"]))
        .await;

    harness.change(PRESS, &NodeFixtures::node("Force"), 7.0);
    harness.settle(Duration::from_millis(50)).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content_type.as_deref(), Some(CONTENT_TYPE_UA_BINARY));
    assert!(!sent[0].body.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_payload_heartbeat_repeats_last_value() {
    let harness = EngineHarness::with_batch_size(1);
    let entry = PublishedNodesEntry::new(PRESS).with_node(
        OpcNodeModel::new(NodeFixtures::id("Stroke")).with_heartbeat(Duration::from_secs(1)),
    );
    harness.publish(&entry).await;

    harness.change(PRESS, &NodeFixtures::node("Stroke"), 42.0);
    harness.settle(Duration::from_millis(2500)).await;

    let all = samples(&harness.sent());
    assert!(all.len() >= 3, "Expected heartbeats, got {:?}", all);
    assert!(all[0].get("IsHeartbeat").is_none());
    assert!(all[1..].iter().all(|s| s["IsHeartbeat"] == true));
    assert_eq!(
        values_for(&harness.sent(), &NodeFixtures::id("Stroke"))
            .iter()
            .filter(|v| **v == 42.0)
            .count(),
        all.len()
    );
}

// =============================================================================
// Restart Announcement
// =============================================================================

#[tokio::test]
async fn test_restart_announcement_sent_once() {
    let harness = EngineHarness::with_config(EngineConfiguration {
        enable_runtime_state_reporting: true,
        ..EngineConfiguration::for_testing()
    });

    assert_eq!(harness.engine.start().await, ReportOutcome::Sent);

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].routing, vec![ROUTING_RUNTIME_INFO.to_string()]);
    assert_eq!(sent[0].content_type.as_deref(), Some(CONTENT_TYPE_JSON));
    let body = json_body(&sent[0]);
    assert_eq!(body["MessageType"], "restartAnnouncement");
    assert_eq!(body["MessageVersion"], 1);
    assert_eq!(harness.client.disposed_count(), 1);
}

#[tokio::test]
async fn test_restart_announcement_failure_disposes() {
    let harness = EngineHarness::with_config(EngineConfiguration {
        enable_runtime_state_reporting: true,
        ..EngineConfiguration::for_testing()
    });
    harness.client.set_should_fail(true);

    assert!(matches!(harness.engine.start().await, ReportOutcome::Failed(_)));
    assert_eq!(harness.client.created_count(), 1);
    assert_eq!(harness.client.disposed_count(), 1);
}

#[tokio::test]
async fn test_restart_disabled_is_noop() {
    let harness = EngineHarness::new();

    assert_eq!(harness.engine.start().await, ReportOutcome::Disabled);
    assert_eq!(harness.client.created_count(), 0);
    assert_eq!(harness.client.send_attempts(), 0);
}

// =============================================================================
// Egress
// =============================================================================

#[test]
fn test_egress_bounded_evicts_oldest() {
    let queue = EgressQueue::new(3);
    let texts = ["m1", "m2", "m3", "m4", "m5"];

    let mut evicted = Vec::new();
    for text in texts {
        if let Some(dropped) = queue.enqueue(data_message("press", text)).unwrap() {
            evicted.push(dropped.body);
        }
        assert!(queue.len() <= 3);
    }

    assert_eq!(evicted, vec![Bytes::from_static(b"m1"), Bytes::from_static(b"m2")]);
    let remaining: Vec<Bytes> = std::iter::from_fn(|| queue.try_dequeue())
        .map(|queued| queued.into_inner().body)
        .collect();
    assert_eq!(
        remaining,
        vec![
            Bytes::from_static(b"m3"),
            Bytes::from_static(b"m4"),
            Bytes::from_static(b"m5")
        ]
    );

    let stats = queue.stats();
    assert_eq!(stats.dropped_overflow, 2);
    assert_eq!(stats.high_watermark, 3);
}

#[tokio::test(start_paused = true)]
async fn test_egress_drain_sends_in_order() {
    let queue = Arc::new(EgressQueue::new(8));
    for text in ["a", "b", "c"] {
        queue.enqueue(data_message("press", text)).unwrap();
    }
    let client = Arc::new(MockMessageClient::new());
    let sender = EgressSender::new(Arc::clone(&queue), Arc::clone(&client), SenderConfig::for_testing());

    let report = sender.drain(Duration::from_secs(1)).await;
    assert_eq!(report.sent, 3);
    assert_eq!(report.abandoned, 0);

    let sent = client.sent();
    assert_eq!(
        sent.iter().map(|m| m.body_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    assert!(queue.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_egress_drain_drops_after_second_failure() {
    let queue = Arc::new(EgressQueue::new(8));
    queue.enqueue(data_message("press", "lost")).unwrap();
    let client = Arc::new(MockMessageClient::failing());
    let sender = EgressSender::new(Arc::clone(&queue), Arc::clone(&client), SenderConfig::for_testing());

    let report = sender.drain(Duration::from_secs(1)).await;
    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(client.send_attempts(), 2);
    assert_eq!(queue.stats().dropped_after_retry, 1);
}
