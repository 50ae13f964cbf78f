use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::event::{Event, EventPattern};
use crate::metrics::Metrics;
use crate::utils::SharedClock;

/// Attribute stamped on events re-published from an archive
pub const REPLAY_ATTRIBUTE: &str = "replay-name";

/// Retained copy of the events that crossed a bus, optionally filtered.
/// Entries older than the retention window are pruned on access.
pub struct Archive {
    name: String,
    pattern: Option<EventPattern>,
    retention: Duration,
    entries: Mutex<VecDeque<(Instant, Event)>>,
    clock: SharedClock,
    metrics: Arc<Metrics>,
}

impl Archive {
    pub fn new(name: impl Into<String>, retention: Duration, clock: SharedClock, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            pattern: None,
            retention,
            entries: Mutex::new(VecDeque::new()),
            clock,
            metrics,
        }
    }

    pub fn with_pattern(mut self, pattern: EventPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts(&self, event: &Event) -> bool {
        event.attribute(REPLAY_ATTRIBUTE).is_none() && self.pattern.as_ref().map_or(true, |p| p.matches(event))
    }

    /// Record the event if it matches; returns whether it was archived
    pub async fn record(&self, event: &Event) -> bool {
        if !self.accepts(event) {
            return false;
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        self.prune(&mut entries, now);
        entries.push_back((now, event.clone()));
        drop(entries);

        self.metrics.record_archived(&self.name);
        tracing::debug!(archive = %self.name, event_id = %event.id, "🗄️ Event archived");
        true
    }

    /// Archived events still inside the retention window, oldest first
    pub async fn events(&self) -> Vec<Event> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        self.prune(&mut entries, now);
        entries.iter().map(|(_, e)| e.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.events().await.len()
    }

    fn prune(&self, entries: &mut VecDeque<(Instant, Event)>, now: Instant) {
        while let Some((archived_at, _)) = entries.front() {
            if now.saturating_duration_since(*archived_at) <= self.retention {
                break;
            }
            entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuditReason, Event};
    use crate::utils::FakeClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_pattern_and_retention() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let archive = Archive::new("auditEvents", 10 * DAY, clock.shared(), metrics)
            .with_pattern(EventPattern::new().source(["app.order"]));

        assert!(archive.record(&Event::order_failure(AuditReason::ProductNotFound)).await);
        assert!(!archive.record(&Event::invoice_failure(AuditReason::Timeout)).await);

        clock.advance(9 * DAY);
        assert!(archive.record(&Event::order_failure(AuditReason::ProductNotFound)).await);
        assert_eq!(archive.len().await, 2);

        clock.advance(2 * DAY);
        assert_eq!(archive.len().await, 1);
    }

    #[tokio::test]
    async fn test_replayed_events_are_not_archived_again() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let archive = Archive::new("everything", DAY, clock.shared(), metrics);

        let replayed = Event::new("app.order", "order").with_attribute(REPLAY_ATTRIBUTE, "everything");
        assert!(!archive.record(&replayed).await);
        assert!(archive.record(&Event::new("app.invoice", "invoice")).await);
    }
}
