// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded drop-oldest egress queue.
//!
//! The queue sits between the encoder of one pipeline and its sender. It is
//! the only mutable state shared between the protocol side and the transport
//! side of a pipeline.
//!
//! # Semantics
//!
//! - **Bounded**: at most `capacity` messages are held.
//! - **Drop-oldest**: a full queue evicts its front; the newest message is
//!   always admitted.
//! - **Requeue once**: a message whose first send failed goes back to the
//!   front; a second failure drops it.
//! - **Bounded waits**: [`EgressQueue::dequeue`] takes a timeout and returns
//!   `None` on expiry.
//!
//! # Example
//!
//! ```rust,ignore
//! let queue = EgressQueue::new(4096);
//! queue.enqueue(message)?;
//!
//! while let Some(queued) = queue.dequeue(Duration::from_millis(100)).await {
//!     if send(&queued).await.is_err() {
//!         queue.requeue_failed(queued);
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use uapub_core::config::{
    DEFAULT_MAX_EGRESS_MESSAGE_QUEUE, MAX_MAX_EGRESS_MESSAGE_QUEUE,
};
use uapub_core::error::EgressError;
use uapub_core::message::NetworkMessage;

use crate::stats::{EgressStats, EgressStatsInner};

// =============================================================================
// QueuedMessage
// =============================================================================

/// A message taken from the queue, with its retry state.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// The encoded message.
    pub message: NetworkMessage,
    requeued: bool,
}

impl QueuedMessage {
    fn new(message: NetworkMessage) -> Self {
        Self {
            message,
            requeued: false,
        }
    }

    /// Returns `true` if this message already failed one send.
    pub fn is_retry(&self) -> bool {
        self.requeued
    }

    /// Unwraps the message.
    pub fn into_inner(self) -> NetworkMessage {
        self.message
    }
}

/// Result of [`EgressQueue::requeue_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Put back at the front of the queue.
    Requeued,
    /// Dropped because it had already failed once.
    DroppedAfterRetry,
    /// Dropped because the queue was full of newer messages.
    DroppedQueueFull,
}

// =============================================================================
// EgressQueue
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueuedMessage>,
    closed: bool,
}

/// Bounded FIFO of encoded messages with drop-oldest overflow.
///
/// # Thread Safety
///
/// `Send + Sync`; producers and consumers share it through an `Arc` without
/// any caller-side locking. The internal `parking_lot::Mutex` is never held
/// across an await.
#[derive(Debug)]
pub struct EgressQueue {
    state: Mutex<QueueState>,
    available: Notify,
    capacity: usize,
    stats: EgressStatsInner,
}

impl EgressQueue {
    /// Creates a queue holding at most `capacity` messages.
    ///
    /// A zero capacity is replaced by the default; larger values than the
    /// configured maximum are capped.
    pub fn new(capacity: usize) -> Self {
        let capacity = match capacity {
            0 => DEFAULT_MAX_EGRESS_MESSAGE_QUEUE,
            c => c.min(MAX_MAX_EGRESS_MESSAGE_QUEUE),
        };
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
            stats: EgressStatsInner::new(),
        }
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued messages.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> EgressStats {
        self.stats.snapshot()
    }

    pub(crate) fn stats_inner(&self) -> &EgressStatsInner {
        &self.stats
    }

    /// Appends a message, evicting the oldest one if the queue is full.
    ///
    /// Returns the evicted message, if any.
    ///
    /// # Errors
    ///
    /// [`EgressError::Closed`] after [`close`](Self::close).
    pub fn enqueue(&self, message: NetworkMessage) -> Result<Option<NetworkMessage>, EgressError> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(EgressError::Closed);
            }

            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front().map(QueuedMessage::into_inner)
            } else {
                None
            };
            state.items.push_back(QueuedMessage::new(message));
            self.stats.record_enqueue(state.items.len());
            evicted
        };

        if let Some(dropped) = &evicted {
            self.stats.record_overflow();
            warn!(
                capacity = self.capacity,
                message_id = %dropped.id,
                writer = %dropped.writer,
                dropped = self.stats.dropped_overflow(),
                "Egress queue full, dropped oldest message"
            );
        }
        self.available.notify_one();
        Ok(evicted)
    }

    /// Removes the front message without waiting.
    pub fn try_dequeue(&self) -> Option<QueuedMessage> {
        let mut state = self.state.lock();
        let item = state.items.pop_front()?;
        self.stats.record_dequeue(state.items.len());
        Some(item)
    }

    /// Removes the front message, waiting at most `timeout` for one.
    ///
    /// A closed queue still hands out what it holds; `None` means the wait
    /// expired or the queue is closed and empty.
    pub async fn dequeue(&self, timeout: Duration) -> Option<QueuedMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    self.stats.record_dequeue(state.items.len());
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Puts a message whose send failed back at the front, once.
    ///
    /// A message that already failed once is dropped and counted. If the
    /// queue filled up with newer messages meanwhile, the failed message is
    /// dropped instead of evicting fresher data.
    pub fn requeue_failed(&self, mut queued: QueuedMessage) -> RequeueOutcome {
        if queued.requeued {
            self.stats.record_retry_drop();
            warn!(
                message_id = %queued.message.id,
                writer = %queued.message.writer,
                "Message failed twice, dropped"
            );
            return RequeueOutcome::DroppedAfterRetry;
        }

        {
            let mut state = self.state.lock();
            if state.items.len() >= self.capacity {
                drop(state);
                self.stats.record_overflow();
                warn!(
                    message_id = %queued.message.id,
                    capacity = self.capacity,
                    "Egress queue full, failed message not requeued"
                );
                return RequeueOutcome::DroppedQueueFull;
            }
            queued.requeued = true;
            debug!(message_id = %queued.message.id, "Requeued failed message");
            state.items.push_front(queued);
            self.stats.record_requeue(state.items.len());
        }
        self.available.notify_one();
        RequeueOutcome::Requeued
    }

    /// Stops accepting new messages and wakes every waiting consumer.
    ///
    /// Queued messages stay available to [`dequeue`](Self::dequeue) for
    /// draining.
    pub fn close(&self) {
        let was_open = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if was_open {
            debug!(remaining = self.len(), "Egress queue closed");
        }
        self.available.notify_waiters();
    }

    /// Removes and returns everything still queued.
    pub fn take_all(&self) -> Vec<QueuedMessage> {
        let mut state = self.state.lock();
        let items: Vec<_> = state.items.drain(..).collect();
        self.stats.set_len(0);
        items
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use uapub_core::message::{MessageEncoding, MessagingMode};
    use uapub_core::types::WriterId;

    fn message(n: usize) -> NetworkMessage {
        NetworkMessage::data(
            WriterId::new("writer-1"),
            Bytes::from(n.to_string()),
            MessageEncoding::Json,
            MessagingMode::Samples,
            1,
        )
    }

    fn body(queued: &QueuedMessage) -> String {
        String::from_utf8(queued.message.body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EgressQueue::new(8);
        for n in 0..3 {
            queue.enqueue(message(n)).unwrap();
        }

        for n in 0..3 {
            let queued = queue.dequeue(Duration::from_millis(10)).await.unwrap();
            assert_eq!(body(&queued), n.to_string());
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest() {
        let queue = EgressQueue::new(3);
        for n in 0..5 {
            queue.enqueue(message(n)).unwrap();
        }

        assert_eq!(queue.len(), 3);
        let stats = queue.stats();
        assert_eq!(stats.dropped_overflow, 2);
        assert_eq!(stats.enqueued, 5);
        assert_eq!(stats.high_watermark, 3);

        let remaining: Vec<_> = queue.take_all().iter().map(body).collect();
        assert_eq!(remaining, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_enqueue_returns_evicted() {
        let queue = EgressQueue::new(2);
        assert!(queue.enqueue(message(0)).unwrap().is_none());
        assert!(queue.enqueue(message(1)).unwrap().is_none());

        let evicted = queue.enqueue(message(2)).unwrap().unwrap();
        assert_eq!(evicted.body, Bytes::from("0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_times_out() {
        let queue = EgressQueue::new(4);
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(250)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(EgressQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.enqueue(message(7)).unwrap();

        let queued = consumer.await.unwrap().unwrap();
        assert_eq!(body(&queued), "7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_waiters_and_rejects_enqueue() {
        let queue = Arc::new(EgressQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
        assert!(matches!(queue.enqueue(message(1)), Err(EgressError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_queue_still_drains() {
        let queue = EgressQueue::new(4);
        queue.enqueue(message(1)).unwrap();
        queue.close();

        assert!(queue.dequeue(Duration::from_millis(10)).await.is_some());
        assert!(queue.dequeue(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_requeue_once_then_drop() {
        let queue = EgressQueue::new(4);
        queue.enqueue(message(1)).unwrap();
        queue.enqueue(message(2)).unwrap();

        let first = queue.try_dequeue().unwrap();
        assert!(!first.is_retry());
        assert_eq!(queue.requeue_failed(first), RequeueOutcome::Requeued);

        let again = queue.try_dequeue().unwrap();
        assert_eq!(body(&again), "1");
        assert!(again.is_retry());
        assert_eq!(queue.requeue_failed(again), RequeueOutcome::DroppedAfterRetry);

        assert_eq!(body(&queue.try_dequeue().unwrap()), "2");
        let stats = queue.stats();
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.dropped_after_retry, 1);
    }

    #[test]
    fn test_requeue_into_full_queue_drops_failed_message() {
        let queue = EgressQueue::new(2);
        queue.enqueue(message(1)).unwrap();
        let failed = queue.try_dequeue().unwrap();
        queue.enqueue(message(2)).unwrap();
        queue.enqueue(message(3)).unwrap();

        assert_eq!(queue.requeue_failed(failed), RequeueOutcome::DroppedQueueFull);
        let remaining: Vec<_> = queue.take_all().iter().map(body).collect();
        assert_eq!(remaining, vec!["2", "3"]);
    }

    #[test]
    fn test_capacity_bounds() {
        assert_eq!(EgressQueue::new(0).capacity(), DEFAULT_MAX_EGRESS_MESSAGE_QUEUE);
        assert_eq!(EgressQueue::new(100_000).capacity(), MAX_MAX_EGRESS_MESSAGE_QUEUE);
        assert_eq!(EgressQueue::new(2).capacity(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_producers_stay_bounded() {
        let queue = Arc::new(EgressQueue::new(64));
        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = Arc::clone(&queue);
            producers.push(tokio::spawn(async move {
                for n in 0..100 {
                    queue.enqueue(message(p * 1000 + n)).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        assert_eq!(queue.len(), 64);
        let stats = queue.stats();
        assert_eq!(stats.enqueued, 400);
        assert_eq!(stats.dropped_overflow, 336);
    }
}
