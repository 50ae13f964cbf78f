use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::Consumer;
use crate::error::{ConsumerError, DeliveryError};
use crate::event::Event;
use crate::metrics::Metrics;
use crate::queue::Queue;
use crate::routing::DeliveryOutcome;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Function Target - a consumer behind an invocation boundary
// ============================================================================
//
// Every invocation is bounded by `timeout`; an invocation that runs over is
// abandoned and counted as a failure. Asynchronous invocations retry
// transient failures with exponential backoff and then hand the event to the
// on-failure queue, when one is configured.
//
// ============================================================================

pub const DEFAULT_FUNCTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct FunctionTarget {
    name: String,
    consumer: Arc<dyn Consumer>,
    timeout: Duration,
    retry: RetryConfig,
    on_failure: Option<Arc<Queue>>,
    metrics: Arc<Metrics>,
}

impl FunctionTarget {
    pub fn new(name: impl Into<String>, consumer: Arc<dyn Consumer>, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            consumer,
            timeout: DEFAULT_FUNCTION_TIMEOUT,
            retry: RetryConfig::async_invocation(),
            on_failure: None,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_on_failure(mut self, queue: Arc<Queue>) -> Self {
        self.on_failure = Some(queue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Single synchronous invocation
    pub async fn invoke(&self, event: &Event) -> Result<(), ConsumerError> {
        self.run(self.consumer.handle(event)).await
    }

    /// Single invocation with a whole batch
    pub async fn invoke_batch(&self, events: &[Event]) -> Result<(), ConsumerError> {
        self.run(self.consumer.handle_batch(events)).await
    }

    /// Fire-and-forget form of `invoke_async`: the invocation runs on its own
    /// task and the caller only gets a handle
    pub fn spawn_async(self: &Arc<Self>, event: Event) -> JoinHandle<Result<DeliveryOutcome, DeliveryError>> {
        let function = Arc::clone(self);
        tokio::spawn(async move { function.invoke_async(event).await })
    }

    /// Asynchronous invocation: retried, then dead-lettered or dropped
    pub async fn invoke_async(&self, event: Event) -> Result<DeliveryOutcome, DeliveryError> {
        let event_ref = &event;
        let result = retry_on_transient(self.retry.clone(), |attempt| {
            self.metrics.record_retry_attempt(&self.name, attempt);
            self.invoke(event_ref)
        })
        .await;

        let error = match result {
            RetryResult::Success(()) => return Ok(DeliveryOutcome::Processed),
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => e,
        };

        match &self.on_failure {
            Some(queue) => {
                tracing::error!(
                    function = %self.name,
                    event_id = %event.id,
                    error = %error,
                    dead_letter_queue = %queue.name(),
                    "❌ Invocation failed after retries, sending event to on-failure queue"
                );
                self.metrics.record_dlq_message(queue.name(), &event.detail_type);
                let failed = event
                    .with_attribute("failedFunction", self.name.clone())
                    .with_attribute("errorMessage", error.to_string());
                let message_id = queue.send(failed).await;
                Ok(DeliveryOutcome::DeadLettered {
                    queue: queue.name().to_string(),
                    message_id,
                })
            }
            None => {
                tracing::error!(
                    function = %self.name,
                    event_id = %event.id,
                    error = %error,
                    "❌ Invocation failed after retries and no on-failure queue is configured"
                );
                Err(DeliveryError::Dropped {
                    target: self.name.clone(),
                    source: error,
                })
            }
        }
    }

    async fn run<F>(&self, invocation: F) -> Result<(), ConsumerError>
    where
        F: Future<Output = Result<(), ConsumerError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(ConsumerError::Timeout(self.timeout)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match &result {
            Ok(()) => "success",
            Err(ConsumerError::Failed(_)) => "failed",
            Err(ConsumerError::Rejected(_)) => "rejected",
            Err(ConsumerError::Timeout(_)) => "timeout",
        };
        self.metrics.record_invocation(&self.name, outcome, elapsed);

        if let Err(error) = &result {
            tracing::warn!(function = %self.name, error = %error, "Invocation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::testing::RecordingConsumer;
    use crate::event::{AuditReason, Event};
    use crate::utils::FakeClock;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let consumer = Arc::new(RecordingConsumer::new().with_delay(Duration::from_millis(200)));
        let function = FunctionTarget::new("slow", consumer, metrics()).with_timeout(Duration::from_millis(20));

        let result = function.invoke(&Event::order_failure(AuditReason::ProductNotFound)).await;
        assert_eq!(result, Err(ConsumerError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_async_invocation_retries_transient_failures() {
        let consumer = Arc::new(RecordingConsumer::new().failing_times(2));
        let function = FunctionTarget::new("product-events", consumer.clone(), metrics())
            .with_retry(RetryConfig::immediate(3));

        let outcome = function
            .invoke_async(Event::new("app.product", "product"))
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Processed);
        assert_eq!(consumer.attempts(), 3);
        assert_eq!(consumer.received().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_invocation_goes_to_on_failure_queue() {
        let clock = FakeClock::new();
        let metrics = metrics();
        let dlq = Arc::new(Queue::new("product-events-dlq", clock.shared(), metrics.clone()));
        let consumer = Arc::new(RecordingConsumer::new().failing_times(u32::MAX));
        let function = FunctionTarget::new("product-events", consumer.clone(), metrics)
            .with_retry(RetryConfig::immediate(3))
            .with_on_failure(dlq.clone());

        let outcome = function
            .invoke_async(Event::new("app.product", "product"))
            .await
            .unwrap();

        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { ref queue, .. } if queue == "product-events-dlq"));
        assert_eq!(consumer.attempts(), 3);

        let dead = dlq.receive(1, Duration::ZERO).await;
        assert_eq!(dead[0].event.attribute("failedFunction"), Some("product-events"));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried_and_is_dropped_without_dlq() {
        let consumer = Arc::new(RecordingConsumer::new().rejecting());
        let function = FunctionTarget::new("payments", consumer.clone(), metrics())
            .with_retry(RetryConfig::immediate(3));

        let result = function.invoke_async(Event::new("app.order", "order")).await;

        assert!(matches!(result, Err(DeliveryError::Dropped { .. })));
        assert_eq!(consumer.attempts(), 1);
    }
}
