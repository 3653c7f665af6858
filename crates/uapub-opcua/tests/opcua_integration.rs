// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA Integration Tests
//!
//! The mock tests run everywhere. The `real_server` tests need the
//! `real-transport` feature and a running OPC UA simulator.
//!
//! # Environment Variables
//!
//! - `OPCUA_TEST_ENDPOINT`: OPC UA server endpoint (default: opc.tcp://localhost:4840)
//! - `OPCUA_TEST_NAMESPACE`: Namespace index for test nodes (default: 2)
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p uapub-opcua --test opcua_integration
//! cargo test -p uapub-opcua --features real-transport --test opcua_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use uapub_core::{Classified, ConnectionState, ErrorClass, HealthState, StatusCode};
use uapub_opcua::{
    ConnectionConfig, ConnectionOptions, EndpointConnection, MockControl, MockTransport, MonitoredItemSpec,
    NodeId, NotificationBatch, SubscriptionSettings,
};

// =============================================================================
// Test Configuration
// =============================================================================

/// Default test endpoint
const DEFAULT_TEST_ENDPOINT: &str = "opc.tcp://localhost:4840";

/// Default test namespace
const DEFAULT_TEST_NAMESPACE: u16 = 2;

/// Get test endpoint from environment or use default
#[allow(dead_code)]
fn test_endpoint() -> String {
    std::env::var("OPCUA_TEST_ENDPOINT").unwrap_or_else(|_| DEFAULT_TEST_ENDPOINT.to_string())
}

/// Get test namespace from environment or use default
fn test_namespace() -> u16 {
    std::env::var("OPCUA_TEST_NAMESPACE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TEST_NAMESPACE)
}

fn node(name: &str) -> NodeId {
    NodeId::string(test_namespace(), name)
}

fn mock_connection() -> (
    Arc<EndpointConnection>,
    tokio::sync::mpsc::Receiver<NotificationBatch>,
    MockControl,
) {
    let transport = MockTransport::new(DEFAULT_TEST_ENDPOINT);
    let control = transport.control();
    let (connection, rx) = EndpointConnection::new(
        ConnectionConfig::new(DEFAULT_TEST_ENDPOINT),
        Box::new(transport),
        ConnectionOptions::for_testing(),
    );
    (connection, rx, control)
}

// =============================================================================
// Mock Server Tests
// =============================================================================

#[tokio::test]
async fn test_subscribe_and_receive() {
    let (connection, mut rx, control) = mock_connection();
    connection.connect_with_retry().await.unwrap();
    connection
        .create_subscription("500ms", SubscriptionSettings::with_interval(Duration::from_millis(500)))
        .await
        .unwrap();
    let outcomes = connection
        .add_items(
            "500ms",
            vec![
                MonitoredItemSpec::new(node("Boiler.Temperature")),
                MonitoredItemSpec::new(node("Boiler.Pressure")),
            ],
        )
        .await
        .unwrap();
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(connection.state(), ConnectionState::Active);

    control.publish(&node("Boiler.Pressure"), 1.5f64);
    let batch = rx.recv().await.unwrap();
    let matched = connection.matcher().match_batch(batch.notifications);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].item.node_id(), &node("Boiler.Pressure"));
    assert_eq!(matched[0].subscription(), "500ms");

    connection.close().await;
}

#[tokio::test]
async fn test_partial_item_failure_is_contained() {
    let (connection, _rx, control) = mock_connection();
    control.reject_node(node("Missing"), StatusCode::BAD_NODE_ID_UNKNOWN);
    connection.connect_with_retry().await.unwrap();
    connection
        .create_subscription("fast", SubscriptionSettings::default())
        .await
        .unwrap();

    let outcomes = connection
        .add_items(
            "fast",
            vec![
                MonitoredItemSpec::new(node("Present")),
                MonitoredItemSpec::new(node("Missing")),
            ],
        )
        .await
        .unwrap();
    assert!(outcomes[0].is_ok());
    assert_eq!(outcomes[1].result.as_ref().unwrap_err().class(), ErrorClass::Fatal);
    assert_eq!(connection.registry().find("fast").unwrap().items().len(), 1);
    assert_eq!(connection.health(), HealthState::Healthy);

    connection.close().await;
}

#[tokio::test]
async fn test_subscription_not_empty() {
    let (connection, _rx, control) = mock_connection();
    connection.connect_with_retry().await.unwrap();
    connection
        .create_subscription("fast", SubscriptionSettings::default())
        .await
        .unwrap();
    connection
        .add_items("fast", vec![MonitoredItemSpec::new(node("A"))])
        .await
        .unwrap();

    let err = connection.remove_subscription("fast").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidState);
    assert_eq!(control.subscription_count(), 1);
    assert_eq!(control.item_count(), 1);

    let id = node("A").to_string();
    assert_eq!(connection.remove_items("fast", &[id.clone(), id]).await.unwrap(), 1);
    connection.remove_subscription("fast").await.unwrap();
    assert_eq!(control.subscription_count(), 0);

    connection.close().await;
}

#[tokio::test]
async fn test_read_without_connect() {
    let (connection, _rx, _control) = mock_connection();
    let err = connection.read(&[node("A")]).await.unwrap_err();
    assert!(err.is_retryable());
}

// =============================================================================
// Real Server Tests
// =============================================================================

/// The test expects `ns=2;s=Demo.Dynamic.Scalar.Double` to change periodically.
#[cfg(feature = "real-transport")]
#[tokio::test(flavor = "multi_thread")]
#[ignore = "Requires OPC UA simulator"]
async fn test_real_server_subscription() {
    use uapub_opcua::RealUaTransport;

    let endpoint = test_endpoint();
    let (connection, mut rx) = EndpointConnection::new(
        ConnectionConfig::new(&endpoint),
        Box::new(RealUaTransport::new(&endpoint)),
        ConnectionOptions::default(),
    );
    connection
        .connect_with_retry()
        .await
        .expect("Failed to connect to OPC UA server");

    connection
        .create_subscription("500ms", SubscriptionSettings::with_interval(Duration::from_millis(500)))
        .await
        .unwrap();
    connection
        .add_items(
            "500ms",
            vec![MonitoredItemSpec::new(node("Demo.Dynamic.Scalar.Double"))],
        )
        .await
        .unwrap();

    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timeout waiting for notification")
        .expect("Notification channel closed");
    assert!(!connection.matcher().match_batch(batch.notifications).is_empty());

    connection.close().await;
}

/// Browsing the Objects folder of a real server.
#[cfg(feature = "real-transport")]
#[tokio::test(flavor = "multi_thread")]
#[ignore = "Requires OPC UA simulator"]
async fn test_real_server_browse() {
    use uapub_opcua::RealUaTransport;

    let endpoint = test_endpoint();
    let (connection, _rx) = EndpointConnection::new(
        ConnectionConfig::new(&endpoint),
        Box::new(RealUaTransport::new(&endpoint)),
        ConnectionOptions::default(),
    );
    connection.connect_with_retry().await.unwrap();

    let references = connection.browse(&NodeId::numeric(0, 85)).await.unwrap();
    assert!(!references.is_empty());

    connection.close().await;
}
