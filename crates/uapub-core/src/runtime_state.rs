// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Runtime lifecycle announcements.
//!
//! The [`RuntimeStateReporter`] sends a fixed-shape restart announcement when
//! the gateway starts, independent of data traffic. It never fails: every
//! problem is logged and reported through [`ReportOutcome`].

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::client::{MessageClient, OutgoingMessage};
use crate::message::{CONTENT_ENCODING_UTF8, CONTENT_TYPE_JSON, ROUTING_RUNTIME_INFO};

/// Message type of the restart announcement.
pub const RESTART_ANNOUNCEMENT: &str = "restartAnnouncement";

/// Version of the runtime state message format.
pub const RUNTIME_STATE_MESSAGE_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RuntimeStateMessage {
    message_type: &'static str,
    message_version: u32,
}

/// What happened to a runtime state report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The message was sent.
    Sent,
    /// Reporting is disabled by configuration.
    Disabled,
    /// No client, or the client reported itself unavailable.
    ClientUnavailable,
    /// Sending failed; the error was logged.
    Failed(String),
}

/// Sends runtime lifecycle messages through a [`MessageClient`].
pub struct RuntimeStateReporter<C: MessageClient> {
    enabled: bool,
    client: Option<Arc<C>>,
}

impl<C: MessageClient> RuntimeStateReporter<C> {
    /// Creates a reporter.
    pub fn new(enabled: bool, client: Option<Arc<C>>) -> Self {
        Self { enabled, client }
    }

    /// Returns `true` if reporting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Announces a gateway restart.
    ///
    /// Never returns an error. The outgoing message is disposed exactly once
    /// whether or not the send succeeds.
    pub async fn send_restart_announcement(&self) -> ReportOutcome {
        if !self.enabled {
            tracing::debug!("Runtime state reporting is disabled, skipping restart announcement");
            return ReportOutcome::Disabled;
        }

        let client = match &self.client {
            Some(client) if client.is_available() => client,
            Some(client) => {
                tracing::warn!(client = %client.name(), "Message client unavailable, skipping restart announcement");
                return ReportOutcome::ClientUnavailable;
            }
            None => {
                tracing::warn!("No message client configured, skipping restart announcement");
                return ReportOutcome::ClientUnavailable;
            }
        };

        let body = match serde_json::to_vec(&RuntimeStateMessage {
            message_type: RESTART_ANNOUNCEMENT,
            message_version: RUNTIME_STATE_MESSAGE_VERSION,
        }) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode restart announcement");
                return ReportOutcome::Failed(e.to_string());
            }
        };

        let mut message = client.create_message(Bytes::from(body));
        message.set_content_type(CONTENT_TYPE_JSON);
        message.set_content_encoding(CONTENT_ENCODING_UTF8);
        message.add_routing_info(ROUTING_RUNTIME_INFO);

        let result = client.send(&mut message).await;
        message.dispose();

        match result {
            Ok(()) => {
                tracing::info!(client = %client.name(), "Restart announcement sent");
                ReportOutcome::Sent
            }
            Err(e) => {
                tracing::error!(client = %client.name(), error = %e, "Failed to send restart announcement");
                ReportOutcome::Failed(e.to_string())
            }
        }
    }
}

impl<C: MessageClient> std::fmt::Debug for RuntimeStateReporter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeStateReporter")
            .field("enabled", &self.enabled)
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
