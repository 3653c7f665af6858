// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Outbound message envelope.
//!
//! A [`NetworkMessage`] is what the publishing pipeline hands to the egress
//! queue: an encoded body plus the headers the transport client needs to
//! route and decode it.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ NetworkMessage                               │
//! │   id              uuid v7 (time ordered)     │
//! │   content_type    application/json | ...     │
//! │   content_encoding utf-8                     │
//! │   message_schema  application/x-monitored... │
//! │   routing_info    optional topic/route       │
//! │   body            Bytes                      │
//! └──────────────────────────────────────────────┘
//! ```

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::WriterId;

// =============================================================================
// Header constants
// =============================================================================

/// JSON content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// OPC UA binary content type.
pub const CONTENT_TYPE_UA_BINARY: &str = "application/opcua+uabinary";

/// Content encoding stamped on every message.
pub const CONTENT_ENCODING_UTF8: &str = "utf-8";

/// Schema of JSON monitored item messages.
pub const SCHEMA_MONITORED_ITEM_JSON: &str = "application/x-monitored-item-json-v1";

/// Schema of binary monitored item messages.
pub const SCHEMA_MONITORED_ITEM_BINARY: &str = "application/x-monitored-item-uabinary-v1";

/// Schema of JSON network messages in pub/sub mode.
pub const SCHEMA_NETWORK_MESSAGE_JSON: &str = "application/x-network-message-json-v1";

/// Schema of binary network messages in pub/sub mode.
pub const SCHEMA_NETWORK_MESSAGE_BINARY: &str = "application/x-network-message-uabinary-v1";

/// Schema of JSON metadata messages.
pub const SCHEMA_METADATA_JSON: &str = "application/x-metadata-json-v1";

/// Schema of binary metadata messages.
pub const SCHEMA_METADATA_BINARY: &str = "application/x-metadata-uabinary-v1";

/// Routing info used by runtime state messages.
pub const ROUTING_RUNTIME_INFO: &str = "runtimeinfo";

// =============================================================================
// Encoding & Mode
// =============================================================================

/// Payload encoding of data messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageEncoding {
    /// JSON text.
    #[default]
    Json,
    /// Compact binary framing.
    Binary,
}

impl MessageEncoding {
    /// Returns the content type for this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            MessageEncoding::Json => CONTENT_TYPE_JSON,
            MessageEncoding::Binary => CONTENT_TYPE_UA_BINARY,
        }
    }

    /// Returns the schema used for data messages in `mode`.
    pub fn data_schema(&self, mode: MessagingMode) -> &'static str {
        match (mode, self) {
            (MessagingMode::Samples, MessageEncoding::Json) => SCHEMA_MONITORED_ITEM_JSON,
            (MessagingMode::Samples, MessageEncoding::Binary) => SCHEMA_MONITORED_ITEM_BINARY,
            (MessagingMode::PubSub, MessageEncoding::Json) => SCHEMA_NETWORK_MESSAGE_JSON,
            (MessagingMode::PubSub, MessageEncoding::Binary) => SCHEMA_NETWORK_MESSAGE_BINARY,
        }
    }

    /// Returns the schema used for metadata messages.
    pub fn metadata_schema(&self) -> &'static str {
        match self {
            MessageEncoding::Json => SCHEMA_METADATA_JSON,
            MessageEncoding::Binary => SCHEMA_METADATA_BINARY,
        }
    }
}

impl fmt::Display for MessageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageEncoding::Json => write!(f, "json"),
            MessageEncoding::Binary => write!(f, "binary"),
        }
    }
}

impl std::str::FromStr for MessageEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(MessageEncoding::Json),
            "binary" | "uadp" | "uabinary" => Ok(MessageEncoding::Binary),
            other => Err(format!("unknown message encoding '{}'", other)),
        }
    }
}

/// Shape of data messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagingMode {
    /// One flat sample per notification.
    #[default]
    Samples,
    /// A network message containing data set messages per writer.
    PubSub,
}

impl fmt::Display for MessagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagingMode::Samples => write!(f, "samples"),
            MessagingMode::PubSub => write!(f, "pub_sub"),
        }
    }
}

impl std::str::FromStr for MessagingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "samples" => Ok(MessagingMode::Samples),
            "pubsub" => Ok(MessagingMode::PubSub),
            other => Err(format!("unknown messaging mode '{}'", other)),
        }
    }
}

// =============================================================================
// NetworkMessage
// =============================================================================

/// Kind of payload carried by a [`NetworkMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Data change notifications.
    Data,
    /// Writer metadata.
    Metadata,
    /// Runtime lifecycle information.
    RuntimeState,
}

/// An encoded message ready for egress.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    /// Unique, time-ordered message id.
    pub id: Uuid,
    /// Writer that produced the message.
    pub writer: WriterId,
    /// Payload kind.
    pub kind: MessageKind,
    /// Encoded payload.
    pub body: Bytes,
    /// MIME content type.
    pub content_type: &'static str,
    /// Content encoding.
    pub content_encoding: &'static str,
    /// Message schema identifier.
    pub message_schema: &'static str,
    /// Optional routing key understood by the transport.
    pub routing_info: Option<String>,
    /// Number of notifications in the payload.
    pub notification_count: usize,
    /// When the message was produced.
    pub created_at: DateTime<Utc>,
}

impl NetworkMessage {
    /// Creates a data message.
    pub fn data(
        writer: WriterId,
        body: Bytes,
        encoding: MessageEncoding,
        mode: MessagingMode,
        notification_count: usize,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            writer,
            kind: MessageKind::Data,
            body,
            content_type: encoding.content_type(),
            content_encoding: CONTENT_ENCODING_UTF8,
            message_schema: encoding.data_schema(mode),
            routing_info: None,
            notification_count,
            created_at: Utc::now(),
        }
    }

    /// Creates a metadata message.
    pub fn metadata(writer: WriterId, body: Bytes, encoding: MessageEncoding) -> Self {
        Self {
            id: Uuid::now_v7(),
            writer,
            kind: MessageKind::Metadata,
            body,
            content_type: encoding.content_type(),
            content_encoding: CONTENT_ENCODING_UTF8,
            message_schema: encoding.metadata_schema(),
            routing_info: None,
            notification_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Sets the routing info.
    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing_info = Some(routing.into());
        self
    }

    /// Returns the payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

impl fmt::Display for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NetworkMessage[{}] writer={} kind={:?} {} bytes, {} notifications",
            self.id,
            self.writer,
            self.kind,
            self.body.len(),
            self.notification_count
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_message_headers() {
        let msg = NetworkMessage::data(
            WriterId::new("writer-1"),
            Bytes::from_static(b"[]"),
            MessageEncoding::Json,
            MessagingMode::Samples,
            0,
        );
        assert_eq!(msg.content_type, "application/json");
        assert_eq!(msg.content_encoding, "utf-8");
        assert_eq!(msg.message_schema, "application/x-monitored-item-json-v1");
        assert_eq!(msg.kind, MessageKind::Data);
        assert_eq!(msg.size(), 2);
    }

    #[test]
    fn test_binary_schema() {
        let msg = NetworkMessage::data(
            WriterId::new("w"),
            Bytes::new(),
            MessageEncoding::Binary,
            MessagingMode::PubSub,
            0,
        );
        assert_eq!(msg.content_type, "application/opcua+uabinary");
        assert_eq!(msg.message_schema, SCHEMA_NETWORK_MESSAGE_BINARY);
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = NetworkMessage::metadata(WriterId::new("w"), Bytes::new(), MessageEncoding::Json);
        let b = NetworkMessage::metadata(WriterId::new("w"), Bytes::new(), MessageEncoding::Json);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.get_version_num(), 7);
    }

    #[test]
    fn test_parse_encoding_and_mode() {
        assert_eq!("JSON".parse::<MessageEncoding>().unwrap(), MessageEncoding::Json);
        assert_eq!("uadp".parse::<MessageEncoding>().unwrap(), MessageEncoding::Binary);
        assert_eq!("pub-sub".parse::<MessagingMode>().unwrap(), MessagingMode::PubSub);
        assert!("xml".parse::<MessageEncoding>().is_err());
    }
}
