use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::buffer::{Queue, ReceivedMessage, ReleaseOutcome};
use crate::consumer::FunctionTarget;
use crate::event::Event;

// ============================================================================
// Queue Poller - event source mapping from a queue to a function
// ============================================================================
//
// Each poll gathers up to `batch_size` messages, waiting at most
// `max_batching_window` to fill the batch, and invokes the function once with
// the whole batch. Success deletes every message; failure releases every
// message so the queue's redrive policy decides what happens next.
//
// ============================================================================

const EMPTY_POLL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub batch_size: usize,
    pub max_batching_window: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_batching_window: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub received: usize,
    pub deleted: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

pub struct QueuePoller {
    queue: Arc<Queue>,
    function: Arc<FunctionTarget>,
    config: PollerConfig,
}

impl QueuePoller {
    pub fn new(queue: Arc<Queue>, function: Arc<FunctionTarget>, config: PollerConfig) -> Self {
        Self {
            queue,
            function,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// One receive / invoke / acknowledge cycle
    pub async fn poll_once(&self) -> PollOutcome {
        let batch = self.gather_batch().await;
        let mut outcome = PollOutcome {
            received: batch.len(),
            ..PollOutcome::default()
        };
        if batch.is_empty() {
            return outcome;
        }

        let events: Vec<Event> = batch.iter().map(|m| m.event.clone()).collect();
        match self.function.invoke_batch(&events).await {
            Ok(()) => {
                for message in &batch {
                    match self.queue.delete(&message.receipt).await {
                        Ok(()) => outcome.deleted += 1,
                        Err(e) => {
                            // visibility expired mid-invocation; the message will be seen again
                            tracing::warn!(queue = %self.queue.name(), error = %e, "Failed to delete processed message");
                        }
                    }
                }
                tracing::debug!(
                    queue = %self.queue.name(),
                    function = %self.function.name(),
                    batch = batch.len(),
                    "✅ Batch processed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    queue = %self.queue.name(),
                    function = %self.function.name(),
                    batch = batch.len(),
                    error = %error,
                    "Batch failed, releasing messages"
                );
                for message in &batch {
                    match self.queue.release(&message.receipt).await {
                        Ok(ReleaseOutcome::Requeued { .. }) => outcome.requeued += 1,
                        Ok(ReleaseOutcome::DeadLettered { .. }) => outcome.dead_lettered += 1,
                        Err(e) => tracing::warn!(queue = %self.queue.name(), error = %e, "Failed to release message"),
                    }
                }
            }
        }

        outcome
    }

    /// Run the poll loop on its own task until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                queue = %self.queue.name(),
                function = %self.function.name(),
                batch_size = self.config.batch_size,
                "🚀 Queue poller started"
            );

            // shutdown is only checked between polls, so a received batch
            // is always deleted or released before the task ends
            loop {
                if *shutdown.borrow() || shutdown.has_changed().is_err() {
                    break;
                }
                let outcome = self.poll_once().await;

                // a zero batching window returns straight away on an empty queue
                if outcome.received == 0 && self.config.max_batching_window.is_zero() {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(EMPTY_POLL_BACKOFF) => {}
                    }
                }
            }

            tracing::info!(queue = %self.queue.name(), "🛑 Queue poller stopped");
        })
    }

    async fn gather_batch(&self) -> Vec<ReceivedMessage> {
        let deadline = tokio::time::Instant::now() + self.config.max_batching_window;
        let mut batch = self
            .queue
            .receive(self.config.batch_size, self.config.max_batching_window)
            .await;

        while !batch.is_empty() && batch.len() < self.config.batch_size {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let more = self
                .queue
                .receive(self.config.batch_size - batch.len(), deadline - now)
                .await;
            if more.is_empty() {
                break;
            }
            batch.extend(more);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::testing::RecordingConsumer;
    use crate::event::{Event, OrderEventType};
    use crate::metrics::Metrics;
    use crate::queue::RedrivePolicy;
    use crate::utils::FakeClock;

    fn short_window() -> PollerConfig {
        PollerConfig {
            batch_size: 5,
            max_batching_window: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_successful_batch_is_deleted() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = Arc::new(Queue::new("order-events", clock.shared(), metrics.clone()));
        let consumer = Arc::new(RecordingConsumer::new());
        let function = Arc::new(FunctionTarget::new("order-emails", consumer.clone(), metrics));

        for _ in 0..7 {
            queue.send(Event::order_lifecycle(OrderEventType::OrderCreated)).await;
        }

        let poller = QueuePoller::new(queue.clone(), function, short_window());
        let first = poller.poll_once().await;
        assert_eq!(first.received, 5);
        assert_eq!(first.deleted, 5);

        let second = poller.poll_once().await;
        assert_eq!(second.received, 2);
        assert_eq!(consumer.received().len(), 7);
        assert_eq!(queue.stats().await.visible + queue.stats().await.not_visible, 0);
    }

    #[tokio::test]
    async fn test_failed_batch_is_released_then_dead_lettered() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let dlq = Arc::new(Queue::new("order-events-dlq", clock.shared(), metrics.clone()));
        let queue = Arc::new(
            Queue::new("order-events", clock.shared(), metrics.clone()).with_redrive_policy(RedrivePolicy {
                max_receive_count: 3,
                dead_letter_queue: dlq.clone(),
            }),
        );
        let consumer = Arc::new(RecordingConsumer::new().failing_times(u32::MAX));
        let function = Arc::new(FunctionTarget::new("order-emails", consumer, metrics));
        queue.send(Event::order_lifecycle(OrderEventType::OrderCreated)).await;

        let poller = QueuePoller::new(queue.clone(), function, short_window());
        assert_eq!(poller.poll_once().await.requeued, 1);
        assert_eq!(poller.poll_once().await.requeued, 1);
        assert_eq!(poller.poll_once().await.dead_lettered, 1);
        assert_eq!(poller.poll_once().await.received, 0);

        assert_eq!(dlq.approximate_number_of_messages_visible().await, 1);
    }

    #[tokio::test]
    async fn test_spawned_poller_stops_on_shutdown() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = Arc::new(Queue::new("order-events", clock.shared(), metrics.clone()));
        let consumer = Arc::new(RecordingConsumer::new());
        let function = Arc::new(FunctionTarget::new("order-emails", consumer.clone(), metrics));
        let (tx, rx) = watch::channel(false);

        let handle = Arc::new(QueuePoller::new(queue.clone(), function, short_window())).spawn(rx);
        queue.send(Event::order_lifecycle(OrderEventType::OrderDeleted)).await;

        for _ in 0..50 {
            if !consumer.received().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(consumer.received().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_lets_the_running_batch_finish() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = Arc::new(Queue::new("order-events", clock.shared(), metrics.clone()));
        let consumer = Arc::new(RecordingConsumer::new().with_delay(Duration::from_millis(200)));
        let function = Arc::new(FunctionTarget::new("order-emails", consumer.clone(), metrics));
        let (tx, rx) = watch::channel(false);

        queue.send(Event::order_lifecycle(OrderEventType::OrderCreated)).await;
        let handle = Arc::new(QueuePoller::new(queue.clone(), function, short_window())).spawn(rx);

        // the batch is inside the invocation when shutdown arrives
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(consumer.received().len(), 1);
        let stats = queue.stats().await;
        assert_eq!(stats.visible + stats.not_visible, 0);
    }
}
