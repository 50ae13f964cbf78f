use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::access::{EventLedger, LeadingKeyPolicy, ScopedWriter};
use crate::config::AppConfig;
use crate::consumer::{Consumer, EmailNotifier, EventRecorder, FunctionTarget, LoggingConsumer};
use crate::event::{EventPattern, KeyPrefix, OrderEventType, EVENT_TYPE_ATTRIBUTE};
use crate::metrics::Metrics;
use crate::monitoring::{
    Alarm, AlarmConfig, AlarmState, LogMetricFilter, MetricSeries, QueueGauge, QueueMetric, Statistic,
};
use crate::producers::{InvoiceEventPublisher, OrderEventPublisher, ProductEventPublisher, PRODUCT_NOT_FOUND_LOG};
use crate::queue::{ChangeStream, Queue, QueuePoller, RedrivePolicy, StreamConfig, StreamProcessor};
use crate::realtime::{CancelImportHandler, ImportUrlHandler, LifecycleLogger, RealtimeApi};
use crate::routing::{Archive, EventBus, FilterPolicy, Rule, Topic};
use crate::utils::{RetryConfig, SharedClock};

// ============================================================================
// Order Topology - the concrete e-commerce event graph
// ============================================================================
//
//   order-events topic
//   ├── order-events function          (all events)
//   ├── payments function              (eventType = ORDER_CREATED)
//   └── order-events queue             (eventType = ORDER_CREATED | ORDER_DELETED)
//       ├── order-emails poller        (batch 5, window 10s)
//       └── order-events-dlq           (after 3 receives)
//
//   AuditEventBus
//   ├── auditEvents archive            (source = app.order, 10 days)
//   ├── NonValidOrderRule              -> orders-errors function
//   ├── NonValidInvoiceRule            -> invoice-errors function
//   └── TimeoutImportInvoiceRule       -> invoice-import-timeout queue
//
//   invoice change stream -> invoice-events function (bisect, 3 retries)
//                                      -> invoice-events-dlq
//   product service -> product-events function (async) -> product-events-dlq
//
//   alarms: InvoiceImportTimeout, AgeOfMessagesInQueue,
//           OrderWithNonValidProduct -> order-alarms topic -> email
//
// ============================================================================

pub const ORDER_EVENTS_TOPIC: &str = "order-events";
pub const ORDER_ALARMS_TOPIC: &str = "order-alarms";
pub const AUDIT_BUS: &str = "AuditEventBus";
pub const AUDIT_ARCHIVE: &str = "auditEvents";
pub const ORDER_EVENTS_QUEUE: &str = "order-events";
pub const ORDER_EVENTS_DLQ: &str = "order-events-dlq";
pub const INVOICE_IMPORT_TIMEOUT_QUEUE: &str = "invoice-import-timeout";
pub const INVOICE_EVENTS_DLQ: &str = "invoice-events-dlq";
pub const PRODUCT_EVENTS_DLQ: &str = "product-events-dlq";
pub const INVOICE_CHANGE_STREAM: &str = "invoices";
pub const ORDER_WITH_NON_VALID_PRODUCT: &str = "OrderWithNonValidProduct";

/// Function bodies plugged into the topology
#[derive(Clone)]
pub struct TopologyConsumers {
    pub order_events: Arc<dyn Consumer>,
    pub payments: Arc<dyn Consumer>,
    pub order_emails: Arc<dyn Consumer>,
    pub orders_errors: Arc<dyn Consumer>,
    pub invoice_errors: Arc<dyn Consumer>,
    pub invoice_events: Arc<dyn Consumer>,
    pub product_events: Arc<dyn Consumer>,
    pub alarm_email: Arc<dyn Consumer>,
}

impl TopologyConsumers {
    /// Event recorders for the event-history functions, logging consumers
    /// for the rest
    pub fn standard(ledger: &Arc<EventLedger>, alarm_email: &str) -> Self {
        let recorder = |writer: &str, prefix: KeyPrefix, id_field: &'static str| -> Arc<dyn Consumer> {
            let policy = LeadingKeyPolicy::new(writer).allow_prefix(prefix);
            Arc::new(EventRecorder::new(
                ScopedWriter::new(ledger.clone(), policy),
                prefix,
                id_field,
            ))
        };

        Self {
            order_events: recorder("order-events", KeyPrefix::Order, "orderId"),
            payments: Arc::new(LoggingConsumer::new("payments")),
            order_emails: Arc::new(LoggingConsumer::new("order-emails")),
            orders_errors: Arc::new(LoggingConsumer::new("orders-errors")),
            invoice_errors: Arc::new(LoggingConsumer::new("invoice-errors")),
            invoice_events: recorder("invoice-events", KeyPrefix::Invoice, "invoiceId"),
            product_events: recorder("product-events", KeyPrefix::Product, "productId"),
            alarm_email: Arc::new(EmailNotifier::new(alarm_email)),
        }
    }
}

/// Log metric filter feeding the OrderWithNonValidProduct alarm; install it
/// in the tracing subscriber and hand its series to `OrderTopology::build`
pub fn product_not_found_filter(clock: SharedClock) -> LogMetricFilter {
    LogMetricFilter::new(
        PRODUCT_NOT_FOUND_LOG,
        Arc::new(MetricSeries::new(ORDER_WITH_NON_VALID_PRODUCT, clock)),
    )
}

/// Snapshot served on `/health`: degraded while an alarm fires or a
/// dead-letter queue holds messages
#[derive(Debug, Serialize)]
pub struct TopologyHealth {
    pub status: &'static str,
    pub alarms: BTreeMap<String, AlarmState>,
    pub dead_letter_queues: BTreeMap<String, usize>,
}

impl TopologyHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct OrderTopology {
    pub order_events_topic: Arc<Topic>,
    pub order_alarms_topic: Arc<Topic>,
    pub audit_bus: Arc<EventBus>,
    pub audit_archive: Arc<Archive>,
    pub order_events_queue: Arc<Queue>,
    pub order_events_dlq: Arc<Queue>,
    pub invoice_import_timeout_queue: Arc<Queue>,
    pub invoice_events_dlq: Arc<Queue>,
    pub product_events_dlq: Arc<Queue>,
    pub invoice_changes: Arc<ChangeStream>,
    pub invoice_stream_processor: Arc<StreamProcessor>,
    pub order_emails_poller: Arc<QueuePoller>,
    pub alarms: Arc<Mutex<Vec<Alarm>>>,
    pub gauges: Arc<Vec<QueueGauge>>,
    pub invoice_ws: Arc<RealtimeApi>,
    pub ledger: Arc<EventLedger>,
    pub orders: OrderEventPublisher,
    pub invoices: InvoiceEventPublisher,
    pub products: ProductEventPublisher,
}

impl OrderTopology {
    pub async fn build(
        config: &AppConfig,
        consumers: TopologyConsumers,
        ledger: Arc<EventLedger>,
        product_not_found: Arc<MetricSeries>,
        clock: SharedClock,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let retry = RetryConfig {
            max_attempts: config.function.async_retry_attempts,
            ..RetryConfig::async_invocation()
        };
        let function = |name: &str, consumer: &Arc<dyn Consumer>| {
            FunctionTarget::new(name, consumer.clone(), metrics.clone())
                .with_timeout(config.function_timeout())
                .with_retry(retry.clone())
        };
        let queue = |name: &str| Queue::new(name, clock.clone(), metrics.clone());

        // Queues
        let order_events_dlq = Arc::new(queue(ORDER_EVENTS_DLQ));
        let order_events_queue = Arc::new(
            queue(ORDER_EVENTS_QUEUE)
                .with_visibility_timeout(config.visibility_timeout())
                .with_redrive_policy(RedrivePolicy {
                    max_receive_count: config.queue.max_receive_count,
                    dead_letter_queue: order_events_dlq.clone(),
                }),
        );
        let invoice_import_timeout_queue = Arc::new(queue(INVOICE_IMPORT_TIMEOUT_QUEUE));
        let invoice_events_dlq = Arc::new(queue(INVOICE_EVENTS_DLQ));
        let product_events_dlq = Arc::new(queue(PRODUCT_EVENTS_DLQ));

        // Order events topic
        let order_events_topic = Arc::new(Topic::new(ORDER_EVENTS_TOPIC, metrics.clone()));
        order_events_topic
            .subscribe(
                "order-events-function",
                Arc::new(function("order-events", &consumers.order_events)),
                None,
            )
            .await;
        order_events_topic
            .subscribe(
                "payments-function",
                Arc::new(function("payments", &consumers.payments)),
                Some(FilterPolicy::new().allow(EVENT_TYPE_ATTRIBUTE, [OrderEventType::OrderCreated.as_str()])),
            )
            .await;
        order_events_topic
            .subscribe(
                "order-events-queue",
                order_events_queue.clone(),
                Some(FilterPolicy::new().allow(
                    EVENT_TYPE_ATTRIBUTE,
                    [OrderEventType::OrderCreated.as_str(), OrderEventType::OrderDeleted.as_str()],
                )),
            )
            .await;

        let order_emails_poller = Arc::new(QueuePoller::new(
            order_events_queue.clone(),
            Arc::new(function("order-emails", &consumers.order_emails)),
            config.poller(),
        ));

        // Audit bus
        let audit_bus = Arc::new(EventBus::new(AUDIT_BUS, metrics.clone()));
        let audit_archive = Arc::new(
            Archive::new(AUDIT_ARCHIVE, config.archive_retention(), clock.clone(), metrics.clone())
                .with_pattern(EventPattern::new().source(["app.order"])),
        );
        audit_bus.add_archive(audit_archive.clone()).await;

        audit_bus
            .put_rule(
                Rule::new(
                    "NonValidOrderRule",
                    EventPattern::new()
                        .source(["app.order"])
                        .detail_type(["order"])
                        .detail("reason", ["PRODUCT_NOT_FOUND"]),
                )
                .with_description("Rule matching non valid order")
                .with_target(Arc::new(function("orders-errors", &consumers.orders_errors))),
            )
            .await?;
        audit_bus
            .put_rule(
                Rule::new(
                    "NonValidInvoiceRule",
                    EventPattern::new()
                        .source(["app.invoice"])
                        .detail_type(["invoice"])
                        .detail("errorDetail", ["FAIL_NO_INVOICE_NUMBER"]),
                )
                .with_description("Rule matching non valid invoice")
                .with_target(Arc::new(function("invoice-errors", &consumers.invoice_errors))),
            )
            .await?;
        audit_bus
            .put_rule(
                Rule::new(
                    "TimeoutImportInvoiceRule",
                    EventPattern::new()
                        .source(["app.invoice"])
                        .detail_type(["invoice"])
                        .detail("errorDetail", ["TIMEOUT"]),
                )
                .with_description("Rule matching timeout import invoice")
                .with_target(invoice_import_timeout_queue.clone()),
            )
            .await?;

        // Invoice change stream
        let invoice_changes = Arc::new(
            ChangeStream::new(INVOICE_CHANGE_STREAM, clock.clone()).with_retention(config.stream_retention()),
        );
        let invoice_stream_processor = Arc::new(StreamProcessor::new(
            invoice_changes.clone(),
            Arc::new(function("invoice-events", &consumers.invoice_events)),
            StreamConfig {
                batch_size: config.stream.batch_size,
                bisect_on_error: config.stream.bisect_on_error,
                retry_attempts: config.stream.retry_attempts,
                on_failure: Some(invoice_events_dlq.clone()),
            },
        ));

        // Product events
        let product_events = Arc::new(
            function("product-events", &consumers.product_events).with_on_failure(product_events_dlq.clone()),
        );

        // Alarms
        let order_alarms_topic = Arc::new(Topic::new(ORDER_ALARMS_TOPIC, metrics.clone()));
        order_alarms_topic
            .subscribe(
                "alarm-email",
                Arc::new(function("alarm-email", &consumers.alarm_email)),
                None,
            )
            .await;

        let visible_series = Arc::new(MetricSeries::new(
            "invoice-import-timeout.ApproximateNumberOfMessagesVisible",
            clock.clone(),
        ));
        let age_series = Arc::new(MetricSeries::new(
            "invoice-import-timeout.ApproximateAgeOfOldestMessage",
            clock.clone(),
        ));
        let gauges = vec![
            QueueGauge::new(
                invoice_import_timeout_queue.clone(),
                QueueMetric::ApproximateNumberOfMessagesVisible,
                visible_series.clone(),
            ),
            QueueGauge::new(
                invoice_import_timeout_queue.clone(),
                QueueMetric::ApproximateAgeOfOldestMessage,
                age_series.clone(),
            ),
        ];

        let alarms = vec![
            Alarm::new(
                AlarmConfig::threshold("InvoiceImportTimeout", Statistic::Sum, 5.0)
                    .with_description("Number of invoice import timeout events in the queue"),
                visible_series,
                metrics.clone(),
            ),
            Alarm::new(
                AlarmConfig::threshold("AgeOfMessagesInQueue", Statistic::Maximum, 60.0)
                    .with_description("Maximum age of messages in invoice import timeout queue"),
                age_series,
                metrics.clone(),
            ),
            Alarm::new(
                AlarmConfig::threshold(ORDER_WITH_NON_VALID_PRODUCT, Statistic::Sum, 2.0)
                    .with_description("Some product was not found while creating a new order"),
                product_not_found,
                metrics.clone(),
            )
            .with_action(order_alarms_topic.clone()),
        ];

        // Invoice realtime api
        let transactions = ScopedWriter::new(
            ledger.clone(),
            LeadingKeyPolicy::new("invoice-ws").allow_prefix(KeyPrefix::Transaction),
        );
        let invoice_ws = Arc::new(
            RealtimeApi::builder("InvoiceWSApi")
                .on_connect(Arc::new(LifecycleLogger))
                .on_disconnect(Arc::new(LifecycleLogger))
                .route(
                    "getImportUrl",
                    Arc::new(ImportUrlHandler::new(
                        transactions.clone(),
                        config.realtime.upload_base_url.clone(),
                    )),
                )
                .route(
                    "cancelImport",
                    Arc::new(CancelImportHandler::new(ledger.clone(), transactions)),
                )
                .build()?,
        );

        tracing::info!(
            topics = 2,
            queues = 5,
            alarms = alarms.len(),
            "✅ Order topology wired"
        );

        Ok(Self {
            orders: OrderEventPublisher::new(order_events_topic.clone(), audit_bus.clone()),
            invoices: InvoiceEventPublisher::new(audit_bus.clone(), invoice_changes.clone()),
            products: ProductEventPublisher::new(product_events),
            order_events_topic,
            order_alarms_topic,
            audit_bus,
            audit_archive,
            order_events_queue,
            order_events_dlq,
            invoice_import_timeout_queue,
            invoice_events_dlq,
            product_events_dlq,
            invoice_changes,
            invoice_stream_processor,
            order_emails_poller,
            alarms: Arc::new(Mutex::new(alarms)),
            gauges: Arc::new(gauges),
            invoice_ws,
            ledger,
        })
    }

    pub async fn health(&self) -> TopologyHealth {
        let alarms: BTreeMap<String, AlarmState> = self
            .alarms
            .lock()
            .await
            .iter()
            .map(|alarm| (alarm.name().to_string(), alarm.state()))
            .collect();

        let mut dead_letter_queues = BTreeMap::new();
        for queue in [&self.order_events_dlq, &self.invoice_events_dlq, &self.product_events_dlq] {
            dead_letter_queues.insert(
                queue.name().to_string(),
                queue.approximate_number_of_messages_visible().await,
            );
        }

        let degraded =
            alarms.values().any(|s| *s == AlarmState::Alarm) || dead_letter_queues.values().any(|depth| *depth > 0);

        TopologyHealth {
            status: if degraded { "degraded" } else { "healthy" },
            alarms,
            dead_letter_queues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::testing::RecordingConsumer;
    use crate::event::{AuditReason, OrderEventType};
    use crate::monitoring::run_actions;
    use crate::routing::DeliveryOutcome;
    use crate::utils::FakeClock;
    use crate::validation::{validate_order_body, validate_product_body, OrderKey};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        topology: OrderTopology,
        payments: Arc<RecordingConsumer>,
        order_emails: Arc<RecordingConsumer>,
        orders_errors: Arc<RecordingConsumer>,
        invoice_events: Arc<RecordingConsumer>,
        alarm_email: Arc<RecordingConsumer>,
    }

    async fn harness(order_emails: RecordingConsumer, invoice_events: RecordingConsumer) -> Harness {
        let clock = FakeClock::new();
        clock.advance(Duration::from_secs(3600));
        let metrics = Arc::new(Metrics::new().unwrap());
        let ledger = Arc::new(EventLedger::new());

        let payments = Arc::new(RecordingConsumer::new());
        let order_emails = Arc::new(order_emails);
        let orders_errors = Arc::new(RecordingConsumer::new());
        let invoice_events = Arc::new(invoice_events);
        let alarm_email = Arc::new(RecordingConsumer::new());

        let mut consumers = TopologyConsumers::standard(&ledger, "ops@example.com");
        consumers.payments = payments.clone();
        consumers.order_emails = order_emails.clone();
        consumers.orders_errors = orders_errors.clone();
        consumers.invoice_events = invoice_events.clone();
        consumers.alarm_email = alarm_email.clone();

        let mut config = AppConfig::default();
        config.queue.max_batching_window_secs = 0;

        let filter = product_not_found_filter(clock.shared());
        let topology = OrderTopology::build(&config, consumers, ledger, filter.series(), clock.shared(), metrics)
            .await
            .unwrap();

        Harness {
            topology,
            payments,
            order_emails,
            orders_errors,
            invoice_events,
            alarm_email,
        }
    }

    fn order_request() -> crate::validation::OrderRequest {
        validate_order_body(r#"{"email":"a@b.com","productIds":["p1"],"payment":"CREDIT_CARD"}"#).unwrap()
    }

    #[tokio::test]
    async fn test_order_created_reaches_all_three_subscribers() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;

        let report = h.topology.orders.order_created("o-1", &order_request()).await.settled().await;
        assert_eq!(report.deliveries.len(), 3);
        assert_eq!(h.payments.received().len(), 1);
        assert_eq!(h.topology.ledger.history("#order_o-1").await.len(), 1);

        let polled = h.topology.order_emails_poller.poll_once().await;
        assert_eq!(polled.deleted, 1);
        assert_eq!(h.order_emails.received()[0].order_event_type(), Some(OrderEventType::OrderCreated));
    }

    #[tokio::test]
    async fn test_order_deleted_skips_payments() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;
        let mut params = std::collections::HashMap::new();
        params.insert("email".to_string(), "a@b.com".to_string());
        params.insert("orderId".to_string(), "o-2".to_string());

        let report = h
            .topology
            .orders
            .order_deleted(&OrderKey::from_query(&params).unwrap())
            .await
            .settled()
            .await;
        assert_eq!(report.deliveries.len(), 2);
        assert!(h.payments.received().is_empty());
        assert_eq!(h.topology.order_events_queue.approximate_number_of_messages_visible().await, 1);
    }

    #[tokio::test]
    async fn test_failing_order_emails_end_in_dlq() {
        let h = harness(RecordingConsumer::new().failing_times(u32::MAX), RecordingConsumer::new()).await;
        h.topology.orders.order_created("o-3", &order_request()).await;

        for _ in 0..3 {
            h.topology.order_emails_poller.poll_once().await;
        }

        assert_eq!(h.topology.order_events_queue.approximate_number_of_messages_visible().await, 0);
        let stats = h.topology.order_events_dlq.dead_letter_stats().await;
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.by_source_queue.get(ORDER_EVENTS_QUEUE), Some(&1));

        let health = h.topology.health().await;
        assert!(!health.is_healthy());
        assert_eq!(health.dead_letter_queues[ORDER_EVENTS_DLQ], 1);
    }

    #[tokio::test]
    async fn test_product_not_found_is_routed_and_archived() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;

        let report = h.topology.orders.product_not_found(&order_request()).await.settled().await;
        assert_eq!(report.matched_rules, vec!["NonValidOrderRule"]);
        assert_eq!(report.archived_in, vec![AUDIT_ARCHIVE]);
        assert_eq!(h.orders_errors.received().len(), 1);

        // invoice failures are not archived
        let report = h
            .topology
            .invoices
            .import_failed("t-1", AuditReason::FailNoInvoiceNumber)
            .await
            .settled()
            .await;
        assert_eq!(report.matched_rules, vec!["NonValidInvoiceRule"]);
        assert!(report.archived_in.is_empty());
    }

    #[tokio::test]
    async fn test_import_timeouts_fire_the_queue_depth_alarm() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;

        for n in 0..6 {
            h.topology
                .invoices
                .import_failed(&format!("t-{}", n), AuditReason::Timeout)
                .await;
        }
        for gauge in h.topology.gauges.iter() {
            gauge.sample().await;
        }

        let mut alarms = h.topology.alarms.lock().await;
        let transitions: Vec<_> = alarms.iter_mut().flat_map(|a| a.evaluate()).collect();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].alarm, "InvoiceImportTimeout");
        assert_eq!(transitions[0].to, AlarmState::Alarm);
    }

    #[tokio::test]
    async fn test_product_not_found_alarm_emails_operators() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;
        let mut alarms = h.topology.alarms.lock().await;
        let alarm = &mut alarms[2];
        assert_eq!(alarm.name(), ORDER_WITH_NON_VALID_PRODUCT);
        assert_eq!(alarm.state(), AlarmState::Ok);

        let transition = alarm.evaluate_window(&[1.0, 1.0]).unwrap();
        for report in run_actions(&alarm.actions_for(&transition), alarm.notification(&transition)).await {
            report.settled().await;
        }

        let emails = h.alarm_email.received();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].detail_str("alarmName"), Some(ORDER_WITH_NON_VALID_PRODUCT));
    }

    #[tokio::test]
    async fn test_invoice_stream_poison_goes_to_invoice_dlq() {
        let poison = RecordingConsumer::new().poisoned_by(|e| e.detail_str("invoiceId") == Some("bad"));
        let h = harness(RecordingConsumer::new(), poison).await;

        for id in ["i-1", "bad", "i-3"] {
            h.topology
                .invoices
                .invoice_changed(id, "INSERT", json!({"invoiceNumber": id}))
                .await;
        }
        let report = h.topology.invoice_stream_processor.process_available().await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.sent_to_on_failure, 1);
        assert_eq!(h.invoice_events.received().len(), 2);
        assert_eq!(h.topology.invoice_events_dlq.approximate_number_of_messages_visible().await, 1);
    }

    #[tokio::test]
    async fn test_product_events_are_recorded_under_product_keys() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;
        let product = validate_product_body(r#"{"productName":"Keyboard","code":"K1"}"#).unwrap();

        let outcome = h
            .topology
            .products
            .product_changed("p-1", "PRODUCT_CREATED", &product)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Processed);
        assert_eq!(h.topology.ledger.history("#product_p-1").await.len(), 1);
        assert_eq!(h.topology.product_events_dlq.approximate_number_of_messages_visible().await, 0);
    }

    #[tokio::test]
    async fn test_invoice_ws_routes_are_wired() {
        let h = harness(RecordingConsumer::new(), RecordingConsumer::new()).await;
        let connection = h.topology.invoice_ws.connect().await.unwrap();

        let reply = h
            .topology
            .invoice_ws
            .dispatch(&connection, r#"{"action":"getImportUrl"}"#)
            .await
            .unwrap()
            .unwrap();
        assert!(reply["url"].as_str().unwrap().starts_with("https://uploads.orderflow.local/invoices/"));
        assert_eq!(h.topology.ledger.keys().await, vec!["#transaction"]);
    }
}
