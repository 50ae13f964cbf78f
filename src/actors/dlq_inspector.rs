use actix::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::alarm_monitor::StopActor;
use crate::queue::{DlqMessage, DlqStats, Queue};

// ============================================================================
// Dead Letter Inspector Actor
// ============================================================================
//
// Operator-facing view over the dead-letter queues of the topology:
// - List messages without consuming them
// - Stats grouped by source queue and detail-type
// - Redrive messages back to their source queue once the cause is fixed
// - Periodic depth report so stuck messages show up in the logs
//
// ============================================================================

const DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DeadLetterBinding {
    pub dead_letter_queue: Arc<Queue>,
    /// Where `RedriveDlq` moves messages; `None` for on-failure destinations
    /// that have no source queue
    pub redrive_to: Option<Arc<Queue>>,
}

pub struct DlqInspectorActor {
    bindings: BTreeMap<String, DeadLetterBinding>,
}

impl DlqInspectorActor {
    pub fn new(bindings: Vec<DeadLetterBinding>) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .map(|b| (b.dead_letter_queue.name().to_string(), b))
                .collect(),
        }
    }

    fn binding(&self, queue: &str) -> Result<DeadLetterBinding, String> {
        self.bindings
            .get(queue)
            .cloned()
            .ok_or_else(|| format!("{} is not a known dead-letter queue", queue))
    }
}

impl Actor for DlqInspectorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(queues = self.bindings.len(), "DlqInspectorActor started - dead-letter queues watched");

        ctx.run_interval(DEPTH_REPORT_INTERVAL, |act, _ctx| {
            let queues: Vec<Arc<Queue>> = act
                .bindings
                .values()
                .map(|b| b.dead_letter_queue.clone())
                .collect();

            actix::spawn(async move {
                for queue in queues {
                    let stats = queue.stats().await;
                    if stats.visible > 0 {
                        tracing::warn!(
                            queue = %queue.name(),
                            messages = stats.visible,
                            oldest_age_secs = stats.oldest_message_age.as_secs(),
                            "💀 Dead-letter queue holds messages"
                        );
                    }
                }
            });
        });
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "Result<Vec<DlqMessage>, String>")]
pub struct GetDlqMessages {
    pub queue: String,
    pub limit: usize,
}

#[derive(Message)]
#[rtype(result = "Result<DlqStats, String>")]
pub struct GetDlqStats {
    pub queue: String,
}

/// Move up to `limit` messages back to the source queue; replies with how
/// many were moved
#[derive(Message)]
#[rtype(result = "Result<usize, String>")]
pub struct RedriveDlq {
    pub queue: String,
    pub limit: usize,
}

// ============================================================================
// Handlers
// ============================================================================

impl Handler<GetDlqMessages> for DlqInspectorActor {
    type Result = ResponseFuture<Result<Vec<DlqMessage>, String>>;

    fn handle(&mut self, msg: GetDlqMessages, _: &mut Self::Context) -> Self::Result {
        let binding = self.binding(&msg.queue);

        Box::pin(async move { Ok(binding?.dead_letter_queue.peek(msg.limit).await) })
    }
}

impl Handler<GetDlqStats> for DlqInspectorActor {
    type Result = ResponseFuture<Result<DlqStats, String>>;

    fn handle(&mut self, msg: GetDlqStats, _: &mut Self::Context) -> Self::Result {
        let binding = self.binding(&msg.queue);

        Box::pin(async move { Ok(binding?.dead_letter_queue.dead_letter_stats().await) })
    }
}

impl Handler<RedriveDlq> for DlqInspectorActor {
    type Result = ResponseFuture<Result<usize, String>>;

    fn handle(&mut self, msg: RedriveDlq, _: &mut Self::Context) -> Self::Result {
        let binding = self.binding(&msg.queue);

        Box::pin(async move {
            let binding = binding?;
            let target = binding
                .redrive_to
                .ok_or_else(|| format!("{} has no redrive target", msg.queue))?;

            let moved = binding.dead_letter_queue.redrive(&target, msg.limit).await;
            tracing::info!(
                dead_letter_queue = %msg.queue,
                target = %target.name(),
                moved,
                "♻️ Dead-letter messages redriven"
            );
            Ok(moved)
        })
    }
}

impl Handler<StopActor> for DlqInspectorActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("DlqInspectorActor received stop signal");
        ctx.stop();
    }
}
