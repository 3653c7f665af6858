// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Batch encoding into [`NetworkMessage`]s.
//!
//! # Shapes
//!
//! | mode      | JSON body                                           |
//! |-----------|-----------------------------------------------------|
//! | `samples` | `[ {NodeId, DisplayName, Value, ...}, ... ]`        |
//! | `pub_sub` | `{MessageId, MessageType, Messages: [ {DataSetWriterId, Payload}, ... ]}` |
//!
//! The binary encoding uses the same records in a length-prefixed
//! little-endian framing with OPC UA variant type ids.
//!
//! # Size bound
//!
//! Every message body stays within the payload limit (maximum message size
//! minus the header reserve). Batches are split across as many messages as
//! needed; a single notification that cannot fit on its own is dropped and
//! counted.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use uapub_core::error::EncodingError;
use uapub_core::{EngineConfiguration, MessageEncoding, MessagingMode, NetworkMessage, Value, WriterId};

use crate::batcher::{Batch, Sample};

/// Publisher id stamped on network and metadata messages.
pub const DEFAULT_PUBLISHER_ID: &str = "uapub";

/// Version byte of the binary framing.
pub const BINARY_FORMAT_VERSION: u8 = 1;

const BINARY_KIND_SAMPLES: u8 = 0x01;
const BINARY_KIND_PUB_SUB: u8 = 0x02;
const BINARY_KIND_METADATA: u8 = 0x10;

const FLAG_HEARTBEAT: u8 = 0x01;

/// Seconds between 1601-01-01 and the Unix epoch.
const UA_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

// =============================================================================
// Settings & Stats
// =============================================================================

/// How batches are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Payload encoding.
    pub encoding: MessageEncoding,
    /// Message shape.
    pub mode: MessagingMode,
    /// Largest body in bytes.
    pub payload_limit: usize,
    /// Publisher id.
    pub publisher_id: String,
}

impl From<&EngineConfiguration> for EncoderSettings {
    fn from(config: &EngineConfiguration) -> Self {
        Self {
            encoding: config.message_encoding,
            mode: config.messaging_mode,
            payload_limit: config.payload_limit(),
            publisher_id: DEFAULT_PUBLISHER_ID.to_string(),
        }
    }
}

/// Point-in-time encoder statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EncoderStats {
    /// Data messages produced.
    pub messages: u64,
    /// Notifications encoded into data messages.
    pub notifications: u64,
    /// Notifications dropped because they exceed the payload limit alone.
    pub dropped_oversize: u64,
    /// Body bytes produced by data messages.
    pub bytes: u64,
    /// Metadata messages produced.
    pub metadata_messages: u64,
}

impl EncoderStats {
    /// Average data message size in bytes.
    pub fn avg_message_size(&self) -> f64 {
        if self.messages == 0 {
            0.0
        } else {
            self.bytes as f64 / self.messages as f64
        }
    }

    /// Average notifications per data message.
    pub fn avg_notifications_per_message(&self) -> f64 {
        if self.messages == 0 {
            0.0
        } else {
            self.notifications as f64 / self.messages as f64
        }
    }
}

#[derive(Debug, Default)]
struct EncoderCounters {
    messages: AtomicU64,
    notifications: AtomicU64,
    dropped_oversize: AtomicU64,
    bytes: AtomicU64,
    metadata_messages: AtomicU64,
}

/// Describes one field of a writer in metadata messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldMetadata {
    /// Field name (display name).
    pub name: String,
    /// Field id (item id).
    pub data_set_field_id: String,
    /// Node id in string form.
    pub node_id: String,
    /// OPC UA built-in type id of the last value (0 if unknown).
    pub built_in_type: u8,
}

// =============================================================================
// MessageEncoder
// =============================================================================

/// Encodes batches and metadata.
#[derive(Debug)]
pub struct MessageEncoder {
    settings: EncoderSettings,
    sequence: AtomicU32,
    counters: EncoderCounters,
}

impl MessageEncoder {
    /// Creates an encoder.
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            sequence: AtomicU32::new(0),
            counters: EncoderCounters::default(),
        }
    }

    /// Encoder settings.
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Returns statistics.
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            messages: self.counters.messages.load(Ordering::Relaxed),
            notifications: self.counters.notifications.load(Ordering::Relaxed),
            dropped_oversize: self.counters.dropped_oversize.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            metadata_messages: self.counters.metadata_messages.load(Ordering::Relaxed),
        }
    }

    /// Encodes a batch into one or more messages.
    ///
    /// An empty batch produces no message.
    pub fn encode(&self, batch: &Batch) -> Vec<NetworkMessage> {
        if batch.is_empty() {
            return Vec::new();
        }

        let frames: Vec<Vec<u8>> = batch
            .samples
            .iter()
            .filter_map(|sample| match self.encode_frame(&batch.writer, sample) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!(writer = %batch.writer, node = %sample.node_id, error = %e, "Failed to encode notification");
                    self.counters.dropped_oversize.fetch_add(1, Ordering::Relaxed);
                    None
                }
            })
            .collect();

        let (overhead, separator) = self.envelope_overhead(&batch.writer);
        let chunks = self.pack(&batch.writer, frames, overhead, separator);

        chunks
            .into_iter()
            .map(|chunk| {
                let id = Uuid::now_v7();
                let count = chunk.len();
                let body = self.assemble(&batch.writer, id, chunk);
                self.counters.messages.fetch_add(1, Ordering::Relaxed);
                self.counters.notifications.fetch_add(count as u64, Ordering::Relaxed);
                self.counters.bytes.fetch_add(body.len() as u64, Ordering::Relaxed);

                let mut message = NetworkMessage::data(
                    batch.writer.clone(),
                    body,
                    self.settings.encoding,
                    self.settings.mode,
                    count,
                );
                message.id = id;
                message
            })
            .collect()
    }

    /// Encodes a metadata message describing `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::TooLarge`] when the description exceeds the
    /// payload limit.
    pub fn encode_metadata(
        &self,
        writer: &WriterId,
        fields: &[FieldMetadata],
    ) -> Result<NetworkMessage, EncodingError> {
        let id = Uuid::now_v7();
        let body = match self.settings.encoding {
            MessageEncoding::Json => Bytes::from(serde_json::to_vec(&JsonMetadataMessage {
                message_id: id,
                message_type: "ua-metadata",
                publisher_id: &self.settings.publisher_id,
                data_set_writer_id: writer.as_str(),
                meta_data: JsonMetaData {
                    name: writer.as_str(),
                    fields,
                    configuration_version: ConfigurationVersion {
                        major_version: 1,
                        minor_version: 0,
                    },
                },
            })?),
            MessageEncoding::Binary => {
                let mut buf = BytesMut::new();
                put_header(&mut buf, BINARY_KIND_METADATA, writer);
                buf.put_u32_le(fields.len() as u32);
                for field in fields {
                    put_string(&mut buf, &field.name);
                    put_string(&mut buf, &field.data_set_field_id);
                    put_string(&mut buf, &field.node_id);
                    buf.put_u8(field.built_in_type);
                }
                buf.freeze()
            }
        };

        if body.len() > self.settings.payload_limit {
            return Err(EncodingError::too_large(body.len(), self.settings.payload_limit));
        }

        self.counters.metadata_messages.fetch_add(1, Ordering::Relaxed);
        let mut message = NetworkMessage::metadata(writer.clone(), body, self.settings.encoding);
        message.id = id;
        Ok(message)
    }

    // =========================================================================
    // Framing
    // =========================================================================

    fn encode_frame(&self, writer: &WriterId, sample: &Sample) -> Result<Vec<u8>, EncodingError> {
        match (self.settings.encoding, self.settings.mode) {
            (MessageEncoding::Json, MessagingMode::Samples) => {
                Ok(serde_json::to_vec(&JsonSample::new(writer, sample))?)
            }
            (MessageEncoding::Json, MessagingMode::PubSub) => {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
                Ok(serde_json::to_vec(&JsonDataSetMessage::new(writer, sample, sequence))?)
            }
            (MessageEncoding::Binary, _) => {
                let mut buf = BytesMut::new();
                put_record(&mut buf, sample);
                Ok(buf.to_vec())
            }
        }
    }

    /// Returns the fixed bytes around the frames and the bytes between two frames.
    fn envelope_overhead(&self, writer: &WriterId) -> (usize, usize) {
        match (self.settings.encoding, self.settings.mode) {
            (MessageEncoding::Json, MessagingMode::Samples) => (2, 1),
            (MessageEncoding::Json, MessagingMode::PubSub) => {
                let (prefix, suffix) = self.pub_sub_envelope(Uuid::nil());
                (prefix.len() + suffix.len(), 1)
            }
            (MessageEncoding::Binary, _) => (binary_header_len(writer) + 4, 0),
        }
    }

    fn pub_sub_envelope(&self, id: Uuid) -> (String, &'static str) {
        let publisher = serde_json::Value::String(self.settings.publisher_id.clone());
        (
            format!(
                r#"{{"MessageId":"{}","MessageType":"ua-data","PublisherId":{},"Messages":["#,
                id, publisher
            ),
            "]}",
        )
    }

    /// Greedily packs frames into chunks that fit the payload limit.
    fn pack(
        &self,
        writer: &WriterId,
        frames: Vec<Vec<u8>>,
        overhead: usize,
        separator: usize,
    ) -> Vec<Vec<Vec<u8>>> {
        let limit = self.settings.payload_limit;
        let mut chunks = Vec::new();
        let mut current: Vec<Vec<u8>> = Vec::new();
        let mut size = overhead;

        for frame in frames {
            if overhead + frame.len() > limit {
                let dropped = self.counters.dropped_oversize.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    writer = %writer,
                    size = frame.len(),
                    limit,
                    dropped,
                    "Notification exceeds message size limit, dropped"
                );
                continue;
            }

            if !current.is_empty() && size + separator + frame.len() > limit {
                chunks.push(std::mem::take(&mut current));
                size = overhead;
            }
            size += if current.is_empty() { frame.len() } else { separator + frame.len() };
            current.push(frame);
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn assemble(&self, writer: &WriterId, id: Uuid, frames: Vec<Vec<u8>>) -> Bytes {
        match (self.settings.encoding, self.settings.mode) {
            (MessageEncoding::Json, MessagingMode::Samples) => {
                Bytes::from(join_frames("[", frames, "]"))
            }
            (MessageEncoding::Json, MessagingMode::PubSub) => {
                let (prefix, suffix) = self.pub_sub_envelope(id);
                Bytes::from(join_frames(&prefix, frames, suffix))
            }
            (MessageEncoding::Binary, mode) => {
                let kind = match mode {
                    MessagingMode::Samples => BINARY_KIND_SAMPLES,
                    MessagingMode::PubSub => BINARY_KIND_PUB_SUB,
                };
                let mut buf = BytesMut::with_capacity(
                    binary_header_len(writer) + 4 + frames.iter().map(Vec::len).sum::<usize>(),
                );
                put_header(&mut buf, kind, writer);
                buf.put_u32_le(frames.len() as u32);
                for frame in frames {
                    buf.put_slice(&frame);
                }
                buf.freeze()
            }
        }
    }
}

fn join_frames(prefix: &str, frames: Vec<Vec<u8>>, suffix: &str) -> Vec<u8> {
    let len = prefix.len() + suffix.len() + frames.iter().map(|f| f.len() + 1).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(prefix.as_bytes());
    for (i, frame) in frames.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&frame);
    }
    out.extend_from_slice(suffix.as_bytes());
    out
}

// =============================================================================
// JSON shapes
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonStatus {
    code: u32,
    symbol: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonDataValue {
    value: serde_json::Value,
    source_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<JsonStatus>,
}

impl JsonDataValue {
    fn new(sample: &Sample) -> Self {
        Self {
            value: sample.value.to_json(),
            source_timestamp: sample.source_timestamp,
            server_timestamp: sample.server_timestamp,
            status_code: (!sample.status.is_good()).then(|| JsonStatus {
                code: sample.status.0,
                symbol: sample.status.name(),
            }),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonSample<'a> {
    node_id: &'a str,
    display_name: &'a str,
    data_set_writer_id: &'a str,
    sequence_number: u32,
    value: JsonDataValue,
    #[serde(skip_serializing_if = "is_false")]
    is_heartbeat: bool,
}

impl<'a> JsonSample<'a> {
    fn new(writer: &'a WriterId, sample: &'a Sample) -> Self {
        Self {
            node_id: &sample.node_id,
            display_name: &sample.display_name,
            data_set_writer_id: writer.as_str(),
            sequence_number: sample.sequence_number,
            value: JsonDataValue::new(sample),
            is_heartbeat: sample.is_heartbeat,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonDataSetMessage<'a> {
    data_set_writer_id: &'a str,
    sequence_number: u32,
    timestamp: DateTime<Utc>,
    payload: std::collections::BTreeMap<&'a str, JsonDataValue>,
    #[serde(skip_serializing_if = "is_false")]
    is_heartbeat: bool,
}

impl<'a> JsonDataSetMessage<'a> {
    fn new(writer: &'a WriterId, sample: &'a Sample, sequence_number: u32) -> Self {
        let mut payload = std::collections::BTreeMap::new();
        payload.insert(sample.display_name.as_str(), JsonDataValue::new(sample));
        Self {
            data_set_writer_id: writer.as_str(),
            sequence_number,
            timestamp: sample.source_timestamp,
            payload,
            is_heartbeat: sample.is_heartbeat,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigurationVersion {
    major_version: u32,
    minor_version: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonMetaData<'a> {
    name: &'a str,
    fields: &'a [FieldMetadata],
    configuration_version: ConfigurationVersion,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonMetadataMessage<'a> {
    message_id: Uuid,
    message_type: &'static str,
    publisher_id: &'a str,
    data_set_writer_id: &'a str,
    meta_data: JsonMetaData<'a>,
}

// =============================================================================
// Binary framing
// =============================================================================

fn binary_header_len(writer: &WriterId) -> usize {
    2 + 4 + writer.as_str().len()
}

fn put_header(buf: &mut BytesMut, kind: u8, writer: &WriterId) {
    buf.put_u8(BINARY_FORMAT_VERSION);
    buf.put_u8(kind);
    put_string(buf, writer.as_str());
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32_le(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

/// Converts to OPC UA ticks: 100 ns intervals since 1601-01-01.
fn ua_ticks(value: &DateTime<Utc>) -> i64 {
    (value.timestamp() + UA_EPOCH_OFFSET_SECS)
        .saturating_mul(10_000_000)
        .saturating_add(i64::from(value.timestamp_subsec_nanos() / 100))
}

fn put_record(buf: &mut BytesMut, sample: &Sample) {
    put_string(buf, &sample.node_id);
    put_string(buf, &sample.display_name);
    buf.put_u32_le(sample.sequence_number);
    buf.put_u32_le(sample.status.0);
    buf.put_i64_le(ua_ticks(&sample.source_timestamp));
    buf.put_i64_le(sample.server_timestamp.as_ref().map(ua_ticks).unwrap_or(0));
    buf.put_u8(if sample.is_heartbeat { FLAG_HEARTBEAT } else { 0 });
    put_variant(buf, &sample.value);
}

fn put_variant(buf: &mut BytesMut, value: &Value) {
    buf.put_u8(value.type_id());
    match value {
        Value::Null => {}
        Value::Boolean(v) => buf.put_u8(u8::from(*v)),
        Value::SByte(v) => buf.put_i8(*v),
        Value::Byte(v) => buf.put_u8(*v),
        Value::Int16(v) => buf.put_i16_le(*v),
        Value::UInt16(v) => buf.put_u16_le(*v),
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::UInt32(v) => buf.put_u32_le(*v),
        Value::Int64(v) => buf.put_i64_le(*v),
        Value::UInt64(v) => buf.put_u64_le(*v),
        Value::Float(v) => buf.put_f32_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(v) => put_string(buf, v),
        Value::ByteString(v) => {
            buf.put_i32_le(v.len() as i32);
            buf.put_slice(v);
        }
        Value::DateTime(v) => buf.put_i64_le(ua_ticks(v)),
        Value::Array(items) => {
            buf.put_i32_le(items.len() as i32);
            for item in items {
                put_variant(buf, item);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::tests::sample;
    use crate::batcher::FlushReason;
    use bytes::Buf;
    use chrono::TimeZone;
    use uapub_core::message::{
        SCHEMA_METADATA_JSON, SCHEMA_MONITORED_ITEM_BINARY, SCHEMA_MONITORED_ITEM_JSON,
        SCHEMA_NETWORK_MESSAGE_JSON,
    };
    use uapub_core::StatusCode;

    fn encoder(encoding: MessageEncoding, mode: MessagingMode, limit: usize) -> MessageEncoder {
        MessageEncoder::new(EncoderSettings {
            encoding,
            mode,
            payload_limit: limit,
            publisher_id: DEFAULT_PUBLISHER_ID.to_string(),
        })
    }

    fn batch(n: usize) -> Batch {
        Batch {
            writer: WriterId::new("line-1"),
            samples: (0..n).map(sample).collect(),
            reason: FlushReason::Size,
        }
    }

    #[test]
    fn test_json_samples() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, 64 * 1024);
        let messages = encoder.encode(&batch(3));

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.notification_count, 3);
        assert_eq!(message.content_type, "application/json");
        assert_eq!(message.content_encoding, "utf-8");
        assert_eq!(message.message_schema, SCHEMA_MONITORED_ITEM_JSON);

        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1]["NodeId"], "ns=2;s=Tag1");
        assert_eq!(items[1]["DisplayName"], "Tag1");
        assert_eq!(items[1]["DataSetWriterId"], "line-1");
        assert_eq!(items[1]["Value"]["Value"], 1);
        assert!(items[1].get("IsHeartbeat").is_none());
        assert!(items[1]["Value"].get("StatusCode").is_none());
    }

    #[test]
    fn test_heartbeat_and_bad_status_are_flagged() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, 64 * 1024);
        let mut b = batch(1);
        b.samples[0].is_heartbeat = true;
        b.samples[0].status = StatusCode::BAD_NODE_ID_UNKNOWN;

        let message = encoder.encode(&b).remove(0);
        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body[0]["IsHeartbeat"], true);
        assert_eq!(body[0]["Value"]["StatusCode"]["Code"], 0x8034_0000u32);
    }

    #[test]
    fn test_json_pub_sub() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::PubSub, 64 * 1024);
        let message = encoder.encode(&batch(2)).remove(0);

        assert_eq!(message.message_schema, SCHEMA_NETWORK_MESSAGE_JSON);
        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body["MessageId"], message.id.to_string());
        assert_eq!(body["MessageType"], "ua-data");
        assert_eq!(body["PublisherId"], "uapub");
        let messages = body["Messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["DataSetWriterId"], "line-1");
        assert_eq!(messages[0]["SequenceNumber"], 1);
        assert_eq!(messages[1]["SequenceNumber"], 2);
        assert_eq!(messages[1]["Payload"]["Tag1"]["Value"], 1);
    }

    #[test]
    fn test_split_respects_limit() {
        let single = encoder(MessageEncoding::Json, MessagingMode::Samples, 64 * 1024)
            .encode(&batch(1))
            .remove(0)
            .size();
        let limit = single * 3;
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, limit);

        let messages = encoder.encode(&batch(20));
        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.size() <= limit));
        assert_eq!(messages.iter().map(|m| m.notification_count).sum::<usize>(), 20);
        for message in &messages {
            let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
            assert_eq!(body.as_array().unwrap().len(), message.notification_count);
        }

        let stats = encoder.stats();
        assert_eq!(stats.messages, messages.len() as u64);
        assert_eq!(stats.notifications, 20);
        assert_eq!(stats.dropped_oversize, 0);
        assert!(stats.avg_notifications_per_message() > 1.0);
        assert!(stats.avg_message_size() <= limit as f64);
    }

    #[test]
    fn test_oversize_notification_is_dropped() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, 300);
        let mut b = batch(3);
        b.samples[1].value = Value::String("x".repeat(1000));

        let messages = encoder.encode(&b);
        assert_eq!(messages.iter().map(|m| m.notification_count).sum::<usize>(), 2);
        assert!(messages.iter().all(|m| m.size() <= 300));
        assert_eq!(encoder.stats().dropped_oversize, 1);
    }

    #[test]
    fn test_empty_batch_produces_nothing() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, 1024);
        assert!(encoder.encode(&batch(0)).is_empty());
        assert_eq!(encoder.stats().messages, 0);
    }

    #[test]
    fn test_binary_framing() {
        let encoder = encoder(MessageEncoding::Binary, MessagingMode::Samples, 64 * 1024);
        let message = encoder.encode(&batch(2)).remove(0);

        assert_eq!(message.content_type, "application/opcua+uabinary");
        assert_eq!(message.message_schema, SCHEMA_MONITORED_ITEM_BINARY);

        let mut body = message.body.clone();
        assert_eq!(body.get_u8(), BINARY_FORMAT_VERSION);
        assert_eq!(body.get_u8(), BINARY_KIND_SAMPLES);
        let writer_len = body.get_i32_le() as usize;
        assert_eq!(&body[..writer_len], b"line-1");
        body.advance(writer_len);
        assert_eq!(body.get_u32_le(), 2);

        let node_len = body.get_i32_le() as usize;
        assert_eq!(&body[..node_len], b"ns=2;s=Tag0");
        body.advance(node_len);
        let name_len = body.get_i32_le() as usize;
        body.advance(name_len);
        assert_eq!(body.get_u32_le(), 0);
        assert_eq!(body.get_u32_le(), StatusCode::GOOD.0);
        assert!(body.get_i64_le() > 0);
        assert_eq!(body.get_i64_le(), 0);
        assert_eq!(body.get_u8(), 0);
        assert_eq!(body.get_u8(), Value::Int32(0).type_id());
        assert_eq!(body.get_i32_le(), 0);
    }

    #[test]
    fn test_binary_split_respects_limit() {
        let encoder = encoder(MessageEncoding::Binary, MessagingMode::Samples, 200);
        let messages = encoder.encode(&batch(10));

        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.size() <= 200));
        assert_eq!(messages.iter().map(|m| m.notification_count).sum::<usize>(), 10);
    }

    #[test]
    fn test_ua_ticks_epoch() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(ua_ticks(&epoch), 116_444_736_000_000_000);
    }

    #[test]
    fn test_metadata_json() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, 64 * 1024);
        let fields = vec![FieldMetadata {
            name: "Temperature".to_string(),
            data_set_field_id: "ns=2;s=Temperature".to_string(),
            node_id: "ns=2;s=Temperature".to_string(),
            built_in_type: 11,
        }];

        let message = encoder.encode_metadata(&WriterId::new("line-1"), &fields).unwrap();
        assert_eq!(message.message_schema, SCHEMA_METADATA_JSON);
        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body["MessageType"], "ua-metadata");
        assert_eq!(body["DataSetWriterId"], "line-1");
        assert_eq!(body["MetaData"]["Fields"][0]["Name"], "Temperature");
        assert_eq!(body["MetaData"]["Fields"][0]["BuiltInType"], 11);
        assert_eq!(encoder.stats().metadata_messages, 1);
    }

    #[test]
    fn test_metadata_too_large() {
        let encoder = encoder(MessageEncoding::Json, MessagingMode::Samples, 50);
        let fields = vec![FieldMetadata {
            name: "x".repeat(100),
            data_set_field_id: "a".to_string(),
            node_id: "i=1".to_string(),
            built_in_type: 0,
        }];
        let err = encoder.encode_metadata(&WriterId::new("w"), &fields).unwrap_err();
        assert!(matches!(err, EncodingError::TooLarge { .. }));
    }
}
