// Private module declaration
mod server;

use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Topic and bus publishes, per-target delivery outcomes
// - Function invocations (outcome, latency) and retry attempts
// - Queue depth / age gauges and dead-letter moves
// - Archive writes
// - Alarm state and transitions
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Routing
    pub events_published: IntCounterVec,
    pub deliveries: IntCounterVec,

    // Invocations
    pub invocations: IntCounterVec,
    pub invocation_duration: HistogramVec,
    pub retry_attempts_total: IntCounterVec,

    // Queues
    pub queue_messages_sent: IntCounterVec,
    pub queue_messages_visible: IntGaugeVec,
    pub queue_messages_not_visible: IntGaugeVec,
    pub queue_oldest_message_age: GaugeVec,

    // DLQ
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_queue: IntCounterVec,

    // Archive
    pub archived_events: IntCounterVec,

    // Alarms
    pub alarm_state: IntGaugeVec,
    pub alarm_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events published to a topic or bus"),
            &["channel"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let deliveries = IntCounterVec::new(
            Opts::new("deliveries_total", "Delivery attempts from a channel to a target"),
            &["channel", "target", "outcome"],
        )?;
        registry.register(Box::new(deliveries.clone()))?;

        let invocations = IntCounterVec::new(
            Opts::new("function_invocations_total", "Function invocations by outcome"),
            &["function", "outcome"],
        )?;
        registry.register(Box::new(invocations.clone()))?;

        let invocation_duration = HistogramVec::new(
            HistogramOpts::new("function_invocation_duration_seconds", "Function invocation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["function"],
        )?;
        registry.register(Box::new(invocation_duration.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total invocation attempts by attempt number"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let queue_messages_sent = IntCounterVec::new(
            Opts::new("queue_messages_sent_total", "Messages sent to a queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_messages_sent.clone()))?;

        let queue_messages_visible = IntGaugeVec::new(
            Opts::new("queue_messages_visible", "Approximate number of visible messages"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_messages_visible.clone()))?;

        let queue_messages_not_visible = IntGaugeVec::new(
            Opts::new("queue_messages_not_visible", "Approximate number of in-flight messages"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_messages_not_visible.clone()))?;

        let queue_oldest_message_age = GaugeVec::new(
            Opts::new("queue_oldest_message_age_seconds", "Approximate age of the oldest message"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_oldest_message_age.clone()))?;

        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages moved to a dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_queue = IntCounterVec::new(
            Opts::new("dlq_messages_by_queue_total", "Dead-lettered messages by DLQ and detail type"),
            &["dead_letter_queue", "detail_type"],
        )?;
        registry.register(Box::new(dlq_messages_by_queue.clone()))?;

        let archived_events = IntCounterVec::new(
            Opts::new("archived_events_total", "Events recorded by an archive"),
            &["archive"],
        )?;
        registry.register(Box::new(archived_events.clone()))?;

        let alarm_state = IntGaugeVec::new(
            Opts::new("alarm_state", "Alarm state (0=OK, 1=ALARM)"),
            &["alarm"],
        )?;
        registry.register(Box::new(alarm_state.clone()))?;

        let alarm_transitions = IntCounterVec::new(
            Opts::new("alarm_transitions_total", "Alarm state transitions"),
            &["alarm", "from_state", "to_state"],
        )?;
        registry.register(Box::new(alarm_transitions.clone()))?;

        Ok(Self {
            registry,
            events_published,
            deliveries,
            invocations,
            invocation_duration,
            retry_attempts_total,
            queue_messages_sent,
            queue_messages_visible,
            queue_messages_not_visible,
            queue_oldest_message_age,
            dlq_messages_total,
            dlq_messages_by_queue,
            archived_events,
            alarm_state,
            alarm_transitions,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_publish(&self, channel: &str) {
        self.events_published.with_label_values(&[channel]).inc();
    }

    pub fn record_delivery(&self, channel: &str, target: &str, outcome: &str) {
        self.deliveries.with_label_values(&[channel, target, outcome]).inc();
    }

    pub fn record_invocation(&self, function: &str, outcome: &str, duration_secs: f64) {
        self.invocations.with_label_values(&[function, outcome]).inc();
        self.invocation_duration.with_label_values(&[function]).observe(duration_secs);
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        let attempt = attempt.to_string();
        self.retry_attempts_total.with_label_values(&[operation, attempt.as_str()]).inc();
    }

    pub fn record_send(&self, queue: &str) {
        self.queue_messages_sent.with_label_values(&[queue]).inc();
    }

    pub fn update_queue_depth(&self, queue: &str, visible: usize, not_visible: usize, oldest_age_secs: f64) {
        self.queue_messages_visible.with_label_values(&[queue]).set(visible as i64);
        self.queue_messages_not_visible.with_label_values(&[queue]).set(not_visible as i64);
        self.queue_oldest_message_age.with_label_values(&[queue]).set(oldest_age_secs);
    }

    pub fn record_dlq_message(&self, dead_letter_queue: &str, detail_type: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_queue.with_label_values(&[dead_letter_queue, detail_type]).inc();
    }

    pub fn record_archived(&self, archive: &str) {
        self.archived_events.with_label_values(&[archive]).inc();
    }

    pub fn update_alarm_state(&self, alarm: &str, alarmed: bool) {
        self.alarm_state.with_label_values(&[alarm]).set(i64::from(alarmed));
    }

    pub fn record_alarm_transition(&self, alarm: &str, from_state: &str, to_state: &str) {
        self.alarm_transitions.with_label_values(&[alarm, from_state, to_state]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_publish("order-events");
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_delivery() {
        let metrics = Metrics::new().unwrap();
        metrics.record_delivery("order-events", "payments", "processed");
        metrics.record_delivery("order-events", "payments", "processed");

        let value = metrics
            .deliveries
            .with_label_values(&["order-events", "payments", "processed"])
            .get();
        assert_eq!(value, 2);
    }

    #[test]
    fn test_record_dlq_message() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("order-events-dlq", "order");
        metrics.record_dlq_message("invoice-events-dlq", "invoice");

        assert_eq!(metrics.dlq_messages_total.get(), 2);
        assert_eq!(
            metrics.dlq_messages_by_queue.with_label_values(&["order-events-dlq", "order"]).get(),
            1
        );
    }

    #[test]
    fn test_queue_depth_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.update_queue_depth("invoice-import-timeout", 6, 1, 12.5);

        assert_eq!(metrics.queue_messages_visible.with_label_values(&["invoice-import-timeout"]).get(), 6);
        assert_eq!(
            metrics.queue_oldest_message_age.with_label_values(&["invoice-import-timeout"]).get(),
            12.5
        );
    }

    #[test]
    fn test_alarm_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_alarm_transition("InvoiceImportTimeout", "OK", "ALARM");
        metrics.update_alarm_state("InvoiceImportTimeout", true);

        assert_eq!(metrics.alarm_state.with_label_values(&["InvoiceImportTimeout"]).get(), 1);
    }
}
