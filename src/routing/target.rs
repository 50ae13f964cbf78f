use futures_util::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::consumer::FunctionTarget;
use crate::error::DeliveryError;
use crate::event::Event;
use crate::metrics::Metrics;
use crate::queue::{MessageId, Queue};

/// Where a topic subscription or bus rule sends matching events
#[derive(Clone)]
pub enum Target {
    /// Asynchronous function invocation (retries, then on-failure queue)
    Function(Arc<FunctionTarget>),
    /// Enqueue for a poller to pick up later
    Queue(Arc<Queue>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryOutcome {
    /// Handed to an invocation running on its own task
    Dispatched,
    Processed,
    Enqueued(MessageId),
    DeadLettered { queue: String, message_id: MessageId },
}

/// Result of one delivery during a publish
#[derive(Clone, Debug)]
pub struct DeliveryRecord {
    pub target: String,
    pub result: Result<DeliveryOutcome, DeliveryError>,
}

impl DeliveryRecord {
    pub fn is_success(&self) -> bool {
        matches!(
            self.result,
            Ok(DeliveryOutcome::Dispatched | DeliveryOutcome::Processed | DeliveryOutcome::Enqueued(_))
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.result, Ok(DeliveryOutcome::Dispatched))
    }

    fn outcome_label(&self) -> &'static str {
        match &self.result {
            Ok(DeliveryOutcome::Dispatched) => "dispatched",
            Ok(DeliveryOutcome::Processed) => "processed",
            Ok(DeliveryOutcome::Enqueued(_)) => "enqueued",
            Ok(DeliveryOutcome::DeadLettered { .. }) => "dead_lettered",
            Err(_) => "dropped",
        }
    }

    /// Count the final outcome; dispatches are counted when they finish
    fn observe(&self, channel: &str, metrics: &Metrics) {
        if self.is_pending() {
            return;
        }
        metrics.record_delivery(channel, &self.target, self.outcome_label());
        if let Err(e) = &self.result {
            tracing::error!(channel = %channel, target = %self.target, error = %e, "Delivery dropped");
        }
    }
}

/// Function invocation still running for a publish
#[derive(Debug)]
pub(crate) struct InFlight {
    slot: usize,
    target: String,
    handle: JoinHandle<DeliveryRecord>,
}

impl InFlight {
    async fn settle(self) -> (usize, DeliveryRecord) {
        let record = match self.handle.await {
            Ok(record) => record,
            Err(e) => DeliveryRecord {
                target: self.target.clone(),
                result: Err(DeliveryError::Aborted {
                    target: self.target,
                    reason: e.to_string(),
                }),
            },
        };
        (self.slot, record)
    }
}

/// The deliveries of one publish. Queue sends complete inline, function
/// invocations are only dispatched.
#[derive(Debug, Default)]
pub(crate) struct Fanout {
    pub records: Vec<DeliveryRecord>,
    pub in_flight: Vec<InFlight>,
}

impl Fanout {
    pub async fn deliver(&mut self, target: &Target, channel: &str, event: Event, metrics: &Arc<Metrics>) {
        let record = match target {
            Target::Queue(queue) => DeliveryRecord {
                target: queue.name().to_string(),
                result: Ok(DeliveryOutcome::Enqueued(queue.send(event).await)),
            },
            Target::Function(function) => {
                let function = function.clone();
                let channel = channel.to_string();
                let metrics = metrics.clone();
                let target = function.name().to_string();

                let handle = tokio::spawn(async move {
                    let record = DeliveryRecord {
                        target: function.name().to_string(),
                        result: function.invoke_async(event).await,
                    };
                    record.observe(&channel, &metrics);
                    record
                });
                self.in_flight.push(InFlight {
                    slot: self.records.len(),
                    target: target.clone(),
                    handle,
                });

                DeliveryRecord {
                    target,
                    result: Ok(DeliveryOutcome::Dispatched),
                }
            }
        };
        record.observe(channel, metrics);
        self.records.push(record);
    }
}

/// Wait for the dispatched invocations and put their final outcome in place
pub(crate) async fn settle(records: &mut [DeliveryRecord], in_flight: Vec<InFlight>) {
    for (slot, record) in join_all(in_flight.into_iter().map(InFlight::settle)).await {
        if let Some(entry) = records.get_mut(slot) {
            *entry = record;
        }
    }
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Function(function) => function.name(),
            Target::Queue(queue) => queue.name(),
        }
    }
}

impl From<Arc<FunctionTarget>> for Target {
    fn from(function: Arc<FunctionTarget>) -> Self {
        Target::Function(function)
    }
}

impl From<Arc<Queue>> for Target {
    fn from(queue: Arc<Queue>) -> Self {
        Target::Queue(queue)
    }
}
