// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Size- and time-triggered batching of matched notifications.
//!
//! Each writer accumulates independently:
//!
//! ```text
//! Idle ──push──► Accumulating ──(batch_size reached | trigger elapsed)──► Flush ──► Idle
//! ```
//!
//! The trigger timer starts when the first sample enters an empty batch.
//! A batch size of one or less disables accumulation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use uapub_core::{EngineConfiguration, StatusCode, Value, WriterId};
use uapub_opcua::MatchedNotification;

// =============================================================================
// Sample
// =============================================================================

/// One notification, resolved against its item and ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Item id inside its subscription.
    pub item_id: String,
    /// Node id in string form.
    pub node_id: String,
    /// Display name.
    pub display_name: String,
    /// Server sequence number (0 for heartbeats).
    pub sequence_number: u32,
    /// Value.
    pub value: Value,
    /// Status code.
    pub status: StatusCode,
    /// Source timestamp.
    pub source_timestamp: DateTime<Utc>,
    /// Server timestamp.
    pub server_timestamp: Option<DateTime<Utc>>,
    /// Synthesized by the heartbeat timer.
    pub is_heartbeat: bool,
}

impl Sample {
    /// Builds a sample from a matched notification.
    pub fn from_matched(matched: MatchedNotification) -> Self {
        let MatchedNotification { item, notification } = matched;
        Self {
            item_id: item.id().to_string(),
            node_id: item.node_id().to_opc_string(),
            display_name: item.display_name().to_string(),
            sequence_number: notification.sequence_number,
            value: notification.value,
            status: notification.status,
            source_timestamp: notification.source_timestamp,
            server_timestamp: notification.server_timestamp,
            is_heartbeat: notification.is_heartbeat,
        }
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached the batch size.
    Size,
    /// The trigger interval elapsed.
    Timer,
    /// Shutdown or writer removal.
    Shutdown,
}

/// A flushed batch of one writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Writer the samples belong to.
    pub writer: WriterId,
    /// Samples in arrival order.
    pub samples: Vec<Sample>,
    /// What triggered the flush.
    pub reason: FlushReason,
}

impl Batch {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if the batch has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// =============================================================================
// MessageBatcher
// =============================================================================

#[derive(Debug)]
struct Pending {
    samples: Vec<Sample>,
    started: Instant,
}

/// Accumulates samples per writer and decides when to flush.
#[derive(Debug)]
pub struct MessageBatcher {
    batch_size: usize,
    trigger_interval: Duration,
    pending: HashMap<WriterId, Pending>,
    flushed: u64,
}

impl MessageBatcher {
    /// Creates a batcher.
    pub fn new(batch_size: usize, trigger_interval: Duration) -> Self {
        Self {
            batch_size,
            trigger_interval,
            pending: HashMap::new(),
            flushed: 0,
        }
    }

    /// Creates a batcher from the engine configuration.
    pub fn from_config(config: &EngineConfiguration) -> Self {
        Self::new(config.batch_size, config.batch_trigger_interval)
    }

    /// Returns `true` if every sample becomes its own batch.
    pub fn is_passthrough(&self) -> bool {
        self.batch_size <= 1
    }

    /// Appends a sample; returns the batch if this push completed it.
    pub fn push(&mut self, writer: WriterId, sample: Sample, now: Instant) -> Option<Batch> {
        if self.is_passthrough() {
            self.flushed += 1;
            return Some(Batch {
                writer,
                samples: vec![sample],
                reason: FlushReason::Size,
            });
        }

        let pending = self.pending.entry(writer.clone()).or_insert_with(|| Pending {
            samples: Vec::with_capacity(self.batch_size),
            started: now,
        });
        pending.samples.push(sample);

        if pending.samples.len() >= self.batch_size {
            return self.take(&writer, FlushReason::Size);
        }
        None
    }

    /// Flushes every batch whose trigger interval has elapsed.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<Batch> {
        let expired: Vec<WriterId> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.started) >= self.trigger_interval)
            .map(|(writer, _)| writer.clone())
            .collect();

        expired
            .iter()
            .filter_map(|writer| self.take(writer, FlushReason::Timer))
            .collect()
    }

    /// Earliest instant at which a pending batch expires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.started + self.trigger_interval)
            .min()
    }

    /// Flushes one writer regardless of size or time.
    pub fn flush_writer(&mut self, writer: &WriterId) -> Option<Batch> {
        self.take(writer, FlushReason::Shutdown)
    }

    /// Flushes every non-empty batch.
    pub fn flush_all(&mut self) -> Vec<Batch> {
        let writers: Vec<WriterId> = self.pending.keys().cloned().collect();
        writers
            .iter()
            .filter_map(|writer| self.take(writer, FlushReason::Shutdown))
            .collect()
    }

    /// Number of samples waiting across all writers.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(|p| p.samples.len()).sum()
    }

    /// Number of batches flushed so far.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    fn take(&mut self, writer: &WriterId, reason: FlushReason) -> Option<Batch> {
        let pending = self.pending.remove(writer)?;
        if pending.samples.is_empty() {
            return None;
        }
        self.flushed += 1;
        Some(Batch {
            writer: writer.clone(),
            samples: pending.samples,
            reason,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
