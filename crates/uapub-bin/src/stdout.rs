// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! A [`MessageClient`] that writes one JSON envelope per message.
//!
//! ```text
//! {"ContentType":"application/json","ContentEncoding":"utf-8",
//!  "Properties":{"$$MessageSchema":"...","$$WriterId":"..."},
//!  "Routing":[],"Body":<json body> | "<base64 body>"}
//! ```
//!
//! JSON bodies are embedded as JSON; binary bodies as base64.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use uapub_core::error::EgressError;
use uapub_core::message::CONTENT_TYPE_JSON;
use uapub_core::{MessageClient, OutgoingMessage};

const CLIENT_NAME: &str = "stdout";

/// A message buffered by [`StdoutMessageClient`].
#[derive(Debug, Default)]
pub struct StdoutMessage {
    body: Bytes,
    content_type: Option<String>,
    content_encoding: Option<String>,
    routing: Vec<String>,
    properties: BTreeMap<String, String>,
}

impl OutgoingMessage for StdoutMessage {
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
        self.properties.insert(key.to_string(), value.to_string());
    }

    fn dispose(self) {}
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_encoding: Option<&'a str>,
    properties: &'a BTreeMap<String, String>,
    routing: &'a [String],
    body: serde_json::Value,
}

impl StdoutMessage {
    fn body_value(&self) -> serde_json::Value {
        if self.content_type.as_deref() == Some(CONTENT_TYPE_JSON) {
            if let Ok(value) = serde_json::from_slice(&self.body) {
                return value;
            }
        }
        serde_json::Value::String(BASE64.encode(&self.body))
    }

    fn render(&self, pretty: bool) -> Result<String, serde_json::Error> {
        let envelope = Envelope {
            content_type: self.content_type.as_deref(),
            content_encoding: self.content_encoding.as_deref(),
            properties: &self.properties,
            routing: &self.routing,
            body: self.body_value(),
        };
        if pretty {
            serde_json::to_string_pretty(&envelope)
        } else {
            serde_json::to_string(&envelope)
        }
    }
}

/// Writes messages to stdout, or to any writer in tests.
pub struct StdoutMessageClient {
    writer: Mutex<Box<dyn Write + Send>>,
    pretty: bool,
    written: AtomicU64,
}

impl StdoutMessageClient {
    /// Creates a client writing to stdout.
    pub fn new(pretty: bool) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), pretty)
    }

    /// Creates a client writing to `writer`.
    pub fn with_writer(writer: Box<dyn Write + Send>, pretty: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            pretty,
            written: AtomicU64::new(0),
        }
    }

    /// Number of messages written.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StdoutMessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutMessageClient")
            .field("pretty", &self.pretty)
            .field("written", &self.written())
            .finish()
    }
}

#[async_trait]
impl MessageClient for StdoutMessageClient {
    type Message = StdoutMessage;

    fn name(&self) -> &str {
        CLIENT_NAME
    }

    fn create_message(&self, body: Bytes) -> Self::Message {
        StdoutMessage {
            body,
            ..Default::default()
        }
    }

    async fn send(&self, message: &mut Self::Message) -> Result<(), EgressError> {
        let line = message
            .render(self.pretty)
            .map_err(|e| EgressError::send_failed(CLIENT_NAME, e.to_string()))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| EgressError::send_failed(CLIENT_NAME, e.to_string()))?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uapub_core::message::CONTENT_TYPE_UA_BINARY;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<serde_json::Value> {
            let content = String::from_utf8(self.0.lock().clone()).unwrap();
            content
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_json_body_embedded() {
        let buffer = SharedBuffer::default();
        let client = StdoutMessageClient::with_writer(Box::new(buffer.clone()), false);

        let mut message = client.create_message(Bytes::from_static(br#"[{"Value":1}]"#));
        message.set_content_type(CONTENT_TYPE_JSON);
        message.set_property("$$WriterId", "line-1");
        message.add_routing_info("$$RuntimeInfo");
        client.send(&mut message).await.unwrap();
        message.dispose();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["Body"][0]["Value"], 1);
        assert_eq!(lines[0]["Properties"]["$$WriterId"], "line-1");
        assert_eq!(lines[0]["Routing"][0], "$$RuntimeInfo");
        assert_eq!(client.written(), 1);
    }

    #[tokio::test]
    async fn test_binary_body_base64() {
        let buffer = SharedBuffer::default();
        let client = StdoutMessageClient::with_writer(Box::new(buffer.clone()), false);

        let mut message = client.create_message(Bytes::from_static(&[1, 2, 3]));
        message.set_content_type(CONTENT_TYPE_UA_BINARY);
        client.send(&mut message).await.unwrap();

        assert_eq!(buffer.lines()[0]["Body"], "AQID");
    }
}
