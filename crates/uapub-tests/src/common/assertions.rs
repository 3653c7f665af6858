// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Assertions
//!
//! Decoding and checking messages recorded by the mock message client.

use serde_json::Value;
use uapub_core::client::{PROPERTY_MESSAGE_SCHEMA, PROPERTY_WRITER_ID};
use uapub_core::MockMessage;

/// Parses the JSON body of `message`.
pub fn json_body(message: &MockMessage) -> Value {
    serde_json::from_str(message.body_str()).expect("Message body is not JSON")
}

/// Flattens the samples of every samples-mode message in `messages`.
pub fn samples(messages: &[MockMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.routing.is_empty())
        .flat_map(|m| match json_body(m) {
            Value::Array(samples) => samples,
            other => panic!("Expected a samples array, got {}", other),
        })
        .collect()
}

/// Values of the samples for `node_id`, in order.
pub fn values_for(messages: &[MockMessage], node_id: &str) -> Vec<Value> {
    samples(messages)
        .into_iter()
        .filter(|s| s["NodeId"] == node_id)
        .map(|s| s["Value"]["Value"].clone())
        .collect()
}

/// Asserts the message carries the writer and schema properties.
pub fn assert_data_message(message: &MockMessage, writer: &str) {
    assert_eq!(message.property(PROPERTY_WRITER_ID), Some(writer));
    assert!(
        message.property(PROPERTY_MESSAGE_SCHEMA).is_some(),
        "Missing message schema property"
    );
}
