use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::Consumer;
use crate::error::ConsumerError;
use crate::event::Event;

/// Scriptable consumer for tests: records what it processed and fails on
/// demand
#[derive(Default)]
pub struct RecordingConsumer {
    received: Mutex<Vec<Event>>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
    reject: bool,
    delay: Option<Duration>,
    poison: Option<Box<dyn Fn(&Event) -> bool + Send + Sync>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` invocations with a transient error
    pub fn failing_times(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every invocation that touches an event matching `poison`
    pub fn poisoned_by(mut self, poison: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.poison = Some(Box::new(poison));
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Event> {
        self.received.lock().unwrap().clone()
    }

    /// Poll until `count` events arrived or `within` elapsed, for consumers
    /// invoked on background tasks
    pub async fn wait_for(&self, count: usize, within: Duration) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let received = self.received();
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn check(&self, events: &[Event]) -> Result<(), ConsumerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.reject {
            return Err(ConsumerError::rejected("scripted rejection"));
        }
        if let Some(poison) = &self.poison {
            if events.iter().any(|e| poison(e)) {
                return Err(ConsumerError::failed("poison record"));
            }
        }
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ConsumerError::failed("scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    async fn handle(&self, event: &Event) -> Result<(), ConsumerError> {
        self.handle_batch(std::slice::from_ref(event)).await
    }

    async fn handle_batch(&self, events: &[Event]) -> Result<(), ConsumerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check(events)?;
        self.received.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}
