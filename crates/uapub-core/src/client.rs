// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Message client capability.
//!
//! The cloud transport is an external collaborator. Anything that can create
//! a message, stamp headers on it, send it and release it can be plugged in
//! by implementing [`MessageClient`].
//!
//! ```text
//! create_message(body) ──► set_content_type / set_content_encoding
//!                          add_routing_info / set_property
//!                     ──► send(&mut msg) ──► dispose(msg)
//! ```
//!
//! [`OutgoingMessage::dispose`] consumes the message, so it can run at most
//! once per message.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::EgressError;
use crate::message::NetworkMessage;

// =============================================================================
// Traits
// =============================================================================

/// A transport-level message created by a [`MessageClient`].
pub trait OutgoingMessage: Send {
    /// Sets the MIME content type.
    fn set_content_type(&mut self, content_type: &str);

    /// Sets the content encoding.
    fn set_content_encoding(&mut self, content_encoding: &str);

    /// Adds routing information (topic, route or output name).
    fn add_routing_info(&mut self, routing: &str);

    /// Sets an application property.
    fn set_property(&mut self, _key: &str, _value: &str) {}

    /// Releases transport resources held by the message.
    fn dispose(self);
}

/// The capability the gateway needs from a cloud transport client.
#[async_trait]
pub trait MessageClient: Send + Sync + 'static {
    /// Message type produced by this client.
    type Message: OutgoingMessage;

    /// Returns the client name for logging/metrics.
    fn name(&self) -> &str;

    /// Returns `true` if the client can currently send.
    fn is_available(&self) -> bool {
        true
    }

    /// Creates a message carrying `body`.
    fn create_message(&self, body: Bytes) -> Self::Message;

    /// Sends a message once.
    async fn send(&self, message: &mut Self::Message) -> Result<(), EgressError>;
}

/// Property key carrying the message schema.
pub const PROPERTY_MESSAGE_SCHEMA: &str = "$$MessageSchema";

/// Property key carrying the writer id.
pub const PROPERTY_WRITER_ID: &str = "$$WriterId";

/// Creates a transport message from an encoded [`NetworkMessage`] with all
/// headers applied.
pub fn build_message<C: MessageClient + ?Sized>(client: &C, message: &NetworkMessage) -> C::Message {
    let mut outgoing = client.create_message(message.body.clone());
    outgoing.set_content_type(message.content_type);
    outgoing.set_content_encoding(message.content_encoding);
    outgoing.set_property(PROPERTY_MESSAGE_SCHEMA, message.message_schema);
    outgoing.set_property(PROPERTY_WRITER_ID, message.writer.as_str());
    if let Some(routing) = &message.routing_info {
        outgoing.add_routing_info(routing);
    }
    outgoing
}

// =============================================================================
// Mock Client (for testing)
// =============================================================================

/// A message created by [`MockMessageClient`].
#[derive(Debug, Clone, Default)]
pub struct MockMessage {
    /// Payload.
    pub body: Bytes,
    /// Content type, if set.
    pub content_type: Option<String>,
    /// Content encoding, if set.
    pub content_encoding: Option<String>,
    /// Routing entries in insertion order.
    pub routing: Vec<String>,
    /// Application properties.
    pub properties: Vec<(String, String)>,
    disposed: Option<Arc<AtomicU64>>,
}

impl MockMessage {
    /// Returns the payload as UTF-8 text.
    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("")
    }

    /// Returns a property value.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl OutgoingMessage for MockMessage {
    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn set_content_encoding(&mut self, content_encoding: &str) {
        self.content_encoding = Some(content_encoding.to_string());
    }

    fn add_routing_info(&mut self, routing: &str) {
        self.routing.push(routing.to_string());
    }

    fn set_property(&mut self, key: &str, value: &str) {
        self.properties.push((key.to_string(), value.to_string()));
    }

    fn dispose(self) {
        if let Some(counter) = &self.disposed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// In-memory message client that records every send.
#[derive(Debug)]
pub struct MockMessageClient {
    sent: Mutex<Vec<MockMessage>>,
    created: AtomicU64,
    send_attempts: AtomicU64,
    disposed: Arc<AtomicU64>,
    should_fail: AtomicBool,
    available: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

impl MockMessageClient {
    /// Creates a new mock client that succeeds.
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            send_attempts: AtomicU64::new(0),
            disposed: Arc::new(AtomicU64::new(0)),
            should_fail: AtomicBool::new(false),
            available: AtomicBool::new(true),
            send_delay: Mutex::new(None),
        }
    }

    /// Creates a mock client whose sends always fail.
    pub fn failing() -> Self {
        let client = Self::new();
        client.set_should_fail(true);
        client
    }

    /// Sets whether sends fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Sets whether the client reports itself as available.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delays every send by `delay`.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock() = delay;
    }

    /// Returns the successfully sent messages.
    pub fn sent(&self) -> Vec<MockMessage> {
        self.sent.lock().clone()
    }

    /// Returns the number of successfully sent messages.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Returns the number of send attempts, successful or not.
    pub fn send_attempts(&self) -> u64 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of created messages.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Returns the number of disposed messages.
    pub fn disposed_count(&self) -> u64 {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for MockMessageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageClient for MockMessageClient {
    type Message = MockMessage;

    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn create_message(&self, body: Bytes) -> MockMessage {
        self.created.fetch_add(1, Ordering::SeqCst);
        MockMessage {
            body,
            disposed: Some(Arc::clone(&self.disposed)),
            ..Default::default()
        }
    }

    async fn send(&self, message: &mut MockMessage) -> Result<(), EgressError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EgressError::send_failed("mock", "Mock failure"));
        }

        let mut recorded = message.clone();
        recorded.disposed = None;
        self.sent.lock().push(recorded);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
