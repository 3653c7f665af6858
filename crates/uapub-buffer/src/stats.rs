// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Egress statistics.
//!
//! All counters are atomics updated without taking the queue lock, so
//! [`EgressStatsInner::snapshot`] is O(1) and never blocks producers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time egress statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressStats {
    /// Messages admitted to the queue.
    pub enqueued: u64,
    /// Messages handed to a consumer.
    pub dequeued: u64,
    /// Oldest messages evicted by a full queue.
    pub dropped_overflow: u64,
    /// Messages put back at the front after a failed first send.
    pub requeued: u64,
    /// Messages dropped after failing a second time.
    pub dropped_after_retry: u64,
    /// Messages sent successfully.
    pub sent: u64,
    /// Failed send attempts.
    pub send_failures: u64,
    /// Payload bytes sent successfully.
    pub bytes_sent: u64,
    /// Messages currently queued.
    pub current_len: u64,
    /// Largest queue length observed.
    pub high_watermark: u64,
}

impl EgressStats {
    /// Total messages lost, for any reason.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_overflow + self.dropped_after_retry
    }

    /// Ratio of failed send attempts to all attempts.
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.sent + self.send_failures;
        if attempts == 0 {
            0.0
        } else {
            self.send_failures as f64 / attempts as f64
        }
    }
}

// =============================================================================
// Lock-free counters
// =============================================================================

/// Atomic counters behind [`EgressStats`].
#[derive(Debug, Default)]
pub struct EgressStatsInner {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped_overflow: AtomicU64,
    requeued: AtomicU64,
    dropped_after_retry: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    bytes_sent: AtomicU64,
    current_len: AtomicU64,
    high_watermark: AtomicU64,
}

impl EgressStatsInner {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_enqueue(&self, len: usize) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.set_len(len);
    }

    #[inline]
    pub(crate) fn record_dequeue(&self, len: usize) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        self.set_len(len);
    }

    #[inline]
    pub(crate) fn record_overflow(&self) {
        self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_requeue(&self, len: usize) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.set_len(len);
    }

    #[inline]
    pub(crate) fn record_retry_drop(&self) {
        self.dropped_after_retry.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful send of `bytes` payload bytes.
    #[inline]
    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records a failed send attempt.
    #[inline]
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_len(&self, len: usize) {
        let len = len as u64;
        self.current_len.store(len, Ordering::Relaxed);
        self.high_watermark.fetch_max(len, Ordering::Relaxed);
    }

    /// Number of messages evicted by a full queue so far.
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    /// Takes a snapshot.
    pub fn snapshot(&self) -> EgressStats {
        EgressStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped_after_retry: self.dropped_after_retry.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            current_len: self.current_len.load(Ordering::Relaxed),
            high_watermark: self.high_watermark.load(Ordering::Relaxed),
        }
    }
}
