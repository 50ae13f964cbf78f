use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::alarm_monitor::{AlarmMonitorActor, StopActor};
use super::dlq_inspector::{DeadLetterBinding, DlqInspectorActor};
use crate::config::AppConfig;
use crate::topology::OrderTopology;

// ============================================================================
// Topology Coordinator - Runs the moving parts of the topology
// ============================================================================
//
// Responsibilities:
// - Starts queue pollers as tokio tasks tied to a shutdown channel
// - Drains the invoice change stream on a fixed interval
// - Starts and stops the alarm monitor and dead-letter inspector
// - Coordinates graceful shutdown
//
// Actor Hierarchy:
//   TopologyCoordinator
//   ├── order-emails poller (task)
//   ├── invoice stream drain (interval)
//   ├── AlarmMonitorActor
//   └── DlqInspectorActor
//
// ============================================================================

pub struct TopologyCoordinator {
    topology: Arc<OrderTopology>,
    alarm_interval: Duration,
    stream_interval: Duration,
    shutdown: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
    alarm_monitor: Option<Addr<AlarmMonitorActor>>,
    dlq_inspector: Option<Addr<DlqInspectorActor>>,
}

impl TopologyCoordinator {
    pub fn new(topology: Arc<OrderTopology>, config: &AppConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            topology,
            alarm_interval: config.alarm_evaluation_interval(),
            stream_interval: config.stream_poll_interval(),
            shutdown,
            pollers: Vec::new(),
            alarm_monitor: None,
            dlq_inspector: None,
        }
    }

    fn start_children(&mut self) {
        tracing::info!("Starting topology workers");

        let poller = self.topology.order_emails_poller.clone();
        self.pollers.push(poller.spawn(self.shutdown.subscribe()));

        self.alarm_monitor = Some(
            AlarmMonitorActor::new(
                self.topology.alarms.clone(),
                self.topology.gauges.clone(),
                self.alarm_interval,
            )
            .start(),
        );

        self.dlq_inspector = Some(
            DlqInspectorActor::new(vec![
                DeadLetterBinding {
                    dead_letter_queue: self.topology.order_events_dlq.clone(),
                    redrive_to: Some(self.topology.order_events_queue.clone()),
                },
                DeadLetterBinding {
                    dead_letter_queue: self.topology.invoice_events_dlq.clone(),
                    redrive_to: None,
                },
                DeadLetterBinding {
                    dead_letter_queue: self.topology.product_events_dlq.clone(),
                    redrive_to: None,
                },
            ])
            .start(),
        );

        tracing::info!("✅ All topology workers started");
    }
}

impl Actor for TopologyCoordinator {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("🎯 TopologyCoordinator started");
        self.start_children();

        ctx.run_interval(self.stream_interval, |act, _ctx| {
            let processor = act.topology.invoice_stream_processor.clone();
            actix::spawn(async move {
                let report = processor.process_available().await;
                if report.sent_to_on_failure + report.discarded > 0 {
                    tracing::warn!(
                        failed = report.sent_to_on_failure + report.discarded,
                        processed = report.processed,
                        "Invoice stream records failed"
                    );
                }
            });
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!("🛑 TopologyCoordinator stopping - initiating graceful shutdown");
        Running::Stop
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("🛑 TopologyCoordinator stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "Result<(), String>")]
pub struct Shutdown;

impl Handler<Shutdown> for TopologyCoordinator {
    type Result = Result<(), String>;

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        tracing::info!("Received shutdown signal");

        self.shutdown.send_replace(true);
        tracing::debug!(pollers = self.pollers.len(), "Pollers signalled to stop");

        if let Some(ref alarm_monitor) = self.alarm_monitor {
            alarm_monitor.do_send(StopActor);
        }

        if let Some(ref dlq_inspector) = self.dlq_inspector {
            dlq_inspector.do_send(StopActor);
        }

        ctx.stop();

        Ok(())
    }
}

// ============================================================================
// Public API for accessing child actors
// ============================================================================

#[derive(Message)]
#[rtype(result = "Option<Addr<AlarmMonitorActor>>")]
pub struct GetAlarmMonitor;

impl Handler<GetAlarmMonitor> for TopologyCoordinator {
    type Result = Option<Addr<AlarmMonitorActor>>;

    fn handle(&mut self, _: GetAlarmMonitor, _: &mut Self::Context) -> Self::Result {
        self.alarm_monitor.clone()
    }
}

#[derive(Message)]
#[rtype(result = "Option<Addr<DlqInspectorActor>>")]
pub struct GetDlqInspector;

impl Handler<GetDlqInspector> for TopologyCoordinator {
    type Result = Option<Addr<DlqInspectorActor>>;

    fn handle(&mut self, _: GetDlqInspector, _: &mut Self::Context) -> Self::Result {
        self.dlq_inspector.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::EventLedger;
    use crate::actors::{GetAlarmStates, GetDlqStats};
    use crate::consumer::testing::RecordingConsumer;
    use crate::metrics::Metrics;
    use crate::topology::{product_not_found_filter, TopologyConsumers, ORDER_EVENTS_DLQ};
    use crate::utils::FakeClock;
    use crate::validation::validate_order_body;

    async fn running_topology(order_emails: Arc<RecordingConsumer>) -> (Arc<OrderTopology>, Addr<TopologyCoordinator>) {
        let clock = FakeClock::new();
        clock.advance(Duration::from_secs(600));
        let metrics = Arc::new(Metrics::new().unwrap());
        let ledger = Arc::new(EventLedger::new());

        let mut consumers = TopologyConsumers::standard(&ledger, "ops@example.com");
        consumers.order_emails = order_emails;

        let mut config = AppConfig::default();
        config.queue.max_batching_window_secs = 0;

        let filter = product_not_found_filter(clock.shared());
        let topology = Arc::new(
            OrderTopology::build(&config, consumers, ledger, filter.series(), clock.shared(), metrics)
                .await
                .unwrap(),
        );
        let coordinator = TopologyCoordinator::new(topology.clone(), &config).start();
        (topology, coordinator)
    }

    #[actix::test]
    async fn test_poller_drains_order_queue_while_running() {
        let emails = Arc::new(RecordingConsumer::new());
        let (topology, coordinator) = running_topology(emails.clone()).await;

        let order = validate_order_body(r#"{"email":"a@b.com","productIds":["p1"],"payment":"CASH"}"#).unwrap();
        topology.orders.order_created("o-1", &order).await;

        assert_eq!(emails.wait_for(1, Duration::from_secs(1)).await.len(), 1);

        coordinator.send(Shutdown).await.unwrap().unwrap();
    }

    #[actix::test]
    async fn test_children_are_reachable() {
        let (_topology, coordinator) = running_topology(Arc::new(RecordingConsumer::new())).await;

        let monitor = coordinator.send(GetAlarmMonitor).await.unwrap().unwrap();
        let states = monitor.send(GetAlarmStates).await.unwrap();
        assert_eq!(states.len(), 3);

        let inspector = coordinator.send(GetDlqInspector).await.unwrap().unwrap();
        let stats = inspector
            .send(GetDlqStats {
                queue: ORDER_EVENTS_DLQ.to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_messages, 0);

        coordinator.send(Shutdown).await.unwrap().unwrap();
    }
}
