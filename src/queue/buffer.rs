use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::QueueError;
use crate::event::Event;
use crate::metrics::Metrics;
use crate::utils::SharedClock;

// ============================================================================
// Queue Buffer - at-least-once point-to-point buffer with redrive
// ============================================================================
//
// Every message carries an explicit receive counter. A received message is
// invisible to other consumers until it is deleted, released, or its
// visibility timeout expires. When a message comes back to the queue after
// `max_receive_count` receives it is moved to the dead-letter queue instead,
// under the source queue's lock, so it is never visible in both places.
//
// ============================================================================

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token proving ownership of one receive of one message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(Uuid);

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dead-letter configuration of a source queue
#[derive(Clone)]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
    pub dead_letter_queue: Arc<Queue>,
}

#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    pub receipt: ReceiptHandle,
    pub message_id: MessageId,
    pub event: Event,
    pub receive_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Visible again for another receive
    Requeued { receive_count: u32 },
    /// Receive budget exhausted, moved to the named queue
    DeadLettered { dead_letter_queue: String },
}

/// Point-in-time view of the queue counters alarms sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueStats {
    pub visible: usize,
    pub not_visible: usize,
    pub oldest_message_age: Duration,
}

#[derive(Clone, Debug)]
pub(super) struct StoredMessage {
    pub(super) id: MessageId,
    pub(super) seq: u64,
    pub(super) event: Event,
    pub(super) receive_count: u32,
    pub(super) sent_at: Instant,
    /// Queue the message was dead-lettered from
    pub(super) source_queue: Option<String>,
}

struct InFlight {
    message: StoredMessage,
    visible_after: Instant,
}

#[derive(Default)]
pub(super) struct QueueState {
    pub(super) visible: VecDeque<StoredMessage>,
    in_flight: HashMap<ReceiptHandle, InFlight>,
    next_seq: u64,
}

impl QueueState {
    /// Insert keeping original enqueue order, so a released message is
    /// offered again before messages sent after it
    fn insert_ordered(&mut self, message: StoredMessage) {
        let position = self
            .visible
            .iter()
            .position(|m| m.seq > message.seq)
            .unwrap_or(self.visible.len());
        self.visible.insert(position, message);
    }

    fn oldest_sent_at(&self) -> Option<Instant> {
        self.visible
            .iter()
            .map(|m| m.sent_at)
            .chain(self.in_flight.values().map(|f| f.message.sent_at))
            .min()
    }
}

pub struct Queue {
    name: String,
    visibility_timeout: Duration,
    redrive: Option<RedrivePolicy>,
    pub(super) state: Mutex<QueueState>,
    available: Notify,
    pub(super) clock: SharedClock,
    pub(super) metrics: Arc<Metrics>,
}

impl Queue {
    pub fn new(name: impl Into<String>, clock: SharedClock, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            redrive: None,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            clock,
            metrics,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_redrive_policy(mut self, policy: RedrivePolicy) -> Self {
        self.redrive = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_receive_count(&self) -> Option<u32> {
        self.redrive.as_ref().map(|r| r.max_receive_count)
    }

    pub fn dead_letter_queue(&self) -> Option<&Arc<Queue>> {
        self.redrive.as_ref().map(|r| &r.dead_letter_queue)
    }

    /// Append an event to the queue
    pub async fn send(&self, event: Event) -> MessageId {
        let id = MessageId::new();
        let now = self.clock.now();
        {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.visible.push_back(StoredMessage {
                id,
                seq,
                event,
                receive_count: 0,
                sent_at: now,
                source_queue: None,
            });
            self.publish_gauges(&state, now);
        }

        self.metrics.record_send(&self.name);
        self.available.notify_one();
        tracing::debug!(queue = %self.name, message_id = %id, "Message enqueued");
        id
    }

    /// Receive up to `max_messages`, waiting up to `wait` while the queue
    /// is empty. Returns an empty batch when the wait elapses.
    pub async fn receive(&self, max_messages: usize, wait: Duration) -> Vec<ReceivedMessage> {
        if max_messages == 0 {
            return Vec::new();
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let batch = self.take_visible(max_messages).await;
            if !batch.is_empty() {
                return batch;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return batch;
            }
            let _ = tokio::time::timeout(deadline - now, self.available.notified()).await;
        }
    }

    /// Acknowledge a message, removing it for good
    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now).await;

        let in_flight = state
            .in_flight
            .remove(receipt)
            .ok_or_else(|| self.unknown_receipt(receipt))?;
        self.publish_gauges(&state, now);

        tracing::debug!(
            queue = %self.name,
            message_id = %in_flight.message.id,
            "Message deleted"
        );
        Ok(())
    }

    /// Report a processing failure; the message becomes visible again or is
    /// dead-lettered once its receive budget is spent
    pub async fn release(&self, receipt: &ReceiptHandle) -> Result<ReleaseOutcome, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now).await;

        let in_flight = state
            .in_flight
            .remove(receipt)
            .ok_or_else(|| self.unknown_receipt(receipt))?;
        let outcome = self.return_message(&mut state, in_flight.message).await;
        self.publish_gauges(&state, now);
        drop(state);

        if matches!(outcome, ReleaseOutcome::Requeued { .. }) {
            self.available.notify_one();
        }
        Ok(outcome)
    }

    pub async fn stats(&self) -> QueueStats {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now).await;
        self.publish_gauges(&state, now);
        Self::compute_stats(&state, now)
    }

    pub async fn approximate_number_of_messages_visible(&self) -> usize {
        self.stats().await.visible
    }

    pub async fn approximate_age_of_oldest_message(&self) -> Duration {
        self.stats().await.oldest_message_age
    }

    /// Accept a message moved here from another queue's redrive
    async fn accept_dead_letter(&self, mut message: StoredMessage, source_queue: &str) {
        let now = self.clock.now();
        {
            let mut state = self.state.lock().await;
            message.seq = state.next_seq;
            state.next_seq += 1;
            message.receive_count = 0;
            message.source_queue = Some(source_queue.to_string());
            state.visible.push_back(message);
            self.publish_gauges(&state, now);
        }
        self.available.notify_one();
    }

    /// Hand messages straight to this queue, keeping their ids (redrive)
    pub(super) async fn accept_redriven(&self, messages: Vec<StoredMessage>) {
        if messages.is_empty() {
            return;
        }
        let now = self.clock.now();
        {
            let mut state = self.state.lock().await;
            for mut message in messages {
                message.seq = state.next_seq;
                state.next_seq += 1;
                message.receive_count = 0;
                message.source_queue = None;
                state.visible.push_back(message);
            }
            self.publish_gauges(&state, now);
        }
        self.available.notify_waiters();
    }

    async fn take_visible(&self, max_messages: usize) -> Vec<ReceivedMessage> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.reclaim_expired(&mut state, now).await;

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut message) = state.visible.pop_front() else {
                break;
            };
            message.receive_count += 1;

            let receipt = ReceiptHandle(Uuid::new_v4());
            batch.push(ReceivedMessage {
                receipt,
                message_id: message.id,
                event: message.event.clone(),
                receive_count: message.receive_count,
            });
            state.in_flight.insert(
                receipt,
                InFlight {
                    message,
                    visible_after: now + self.visibility_timeout,
                },
            );
        }

        if !batch.is_empty() {
            self.publish_gauges(&state, now);
        }
        batch
    }

    /// Return in-flight messages whose visibility timeout elapsed
    async fn reclaim_expired(&self, state: &mut QueueState, now: Instant) {
        let expired: Vec<ReceiptHandle> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_after <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in expired {
            if let Some(in_flight) = state.in_flight.remove(&receipt) {
                tracing::warn!(
                    queue = %self.name,
                    message_id = %in_flight.message.id,
                    receive_count = in_flight.message.receive_count,
                    "Visibility timeout expired, treating as processing failure"
                );
                self.return_message(state, in_flight.message).await;
            }
        }
    }

    async fn return_message(&self, state: &mut QueueState, message: StoredMessage) -> ReleaseOutcome {
        if let Some(redrive) = &self.redrive {
            if message.receive_count >= redrive.max_receive_count {
                let dlq = &redrive.dead_letter_queue;
                tracing::error!(
                    queue = %self.name,
                    dead_letter_queue = %dlq.name(),
                    message_id = %message.id,
                    receive_count = message.receive_count,
                    "💀 Receive budget exhausted, moving message to dead letter queue"
                );
                self.metrics.record_dlq_message(dlq.name(), &message.event.detail_type);
                dlq.accept_dead_letter(message, &self.name).await;
                return ReleaseOutcome::DeadLettered {
                    dead_letter_queue: dlq.name().to_string(),
                };
            }
        }

        let receive_count = message.receive_count;
        state.insert_ordered(message);
        ReleaseOutcome::Requeued { receive_count }
    }

    fn compute_stats(state: &QueueState, now: Instant) -> QueueStats {
        QueueStats {
            visible: state.visible.len(),
            not_visible: state.in_flight.len(),
            oldest_message_age: state
                .oldest_sent_at()
                .map(|sent| now.saturating_duration_since(sent))
                .unwrap_or_default(),
        }
    }

    fn publish_gauges(&self, state: &QueueState, now: Instant) {
        let stats = Self::compute_stats(state, now);
        self.metrics.update_queue_depth(
            &self.name,
            stats.visible,
            stats.not_visible,
            stats.oldest_message_age.as_secs_f64(),
        );
    }

    fn unknown_receipt(&self, receipt: &ReceiptHandle) -> QueueError {
        QueueError::UnknownReceipt {
            queue: self.name.clone(),
            receipt: receipt.to_string(),
        }
    }
}
