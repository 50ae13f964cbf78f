use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::monitoring::{run_actions, Alarm, AlarmState, AlarmTransition, QueueGauge};

// ============================================================================
// Alarm Monitor Actor - Periodic alarm evaluation
// ============================================================================
//
// Every interval:
// 1. Sample queue gauges into their metric series
// 2. Evaluate every alarm window that closed since the last cycle
// 3. Publish notifications for transitions into ALARM
//
// Alarm actions run after the alarm lock is released, so a slow subscriber
// never delays the next evaluation.
//
// ============================================================================

pub struct AlarmMonitorActor {
    alarms: Arc<Mutex<Vec<Alarm>>>,
    gauges: Arc<Vec<QueueGauge>>,
    interval: Duration,
}

impl AlarmMonitorActor {
    pub fn new(alarms: Arc<Mutex<Vec<Alarm>>>, gauges: Arc<Vec<QueueGauge>>, interval: Duration) -> Self {
        Self {
            alarms,
            gauges,
            interval,
        }
    }
}

async fn evaluate_cycle(alarms: Arc<Mutex<Vec<Alarm>>>, gauges: Arc<Vec<QueueGauge>>) -> Vec<AlarmTransition> {
    for gauge in gauges.iter() {
        gauge.sample().await;
    }

    let pending = {
        let mut alarms = alarms.lock().await;
        alarms
            .iter_mut()
            .flat_map(|alarm| {
                alarm
                    .evaluate()
                    .into_iter()
                    .map(|transition| {
                        let actions = alarm.actions_for(&transition);
                        let notification = alarm.notification(&transition);
                        (transition, actions, notification)
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    };

    let mut transitions = Vec::with_capacity(pending.len());
    for (transition, actions, notification) in pending {
        if !actions.is_empty() {
            run_actions(&actions, notification).await;
        }
        transitions.push(transition);
    }
    transitions
}

impl Actor for AlarmMonitorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(interval_secs = self.interval.as_secs(), "⏰ AlarmMonitorActor started");

        ctx.run_interval(self.interval, |act, _ctx| {
            let alarms = act.alarms.clone();
            let gauges = act.gauges.clone();

            actix::spawn(async move {
                let transitions = evaluate_cycle(alarms, gauges).await;
                if !transitions.is_empty() {
                    tracing::debug!(transitions = transitions.len(), "Alarm evaluation produced transitions");
                }
            });
        });
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("🛑 AlarmMonitorActor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Run one evaluation cycle now, outside the regular interval
#[derive(Message)]
#[rtype(result = "Vec<AlarmTransition>")]
pub struct EvaluateAlarms;

#[derive(Message)]
#[rtype(result = "Vec<(String, AlarmState)>")]
pub struct GetAlarmStates;

#[derive(Message)]
#[rtype(result = "()")]
pub struct StopActor;

impl Handler<EvaluateAlarms> for AlarmMonitorActor {
    type Result = ResponseFuture<Vec<AlarmTransition>>;

    fn handle(&mut self, _msg: EvaluateAlarms, _: &mut Self::Context) -> Self::Result {
        let alarms = self.alarms.clone();
        let gauges = self.gauges.clone();
        Box::pin(evaluate_cycle(alarms, gauges))
    }
}

impl Handler<GetAlarmStates> for AlarmMonitorActor {
    type Result = ResponseFuture<Vec<(String, AlarmState)>>;

    fn handle(&mut self, _msg: GetAlarmStates, _: &mut Self::Context) -> Self::Result {
        let alarms = self.alarms.clone();

        Box::pin(async move {
            alarms
                .lock()
                .await
                .iter()
                .map(|alarm| (alarm.name().to_string(), alarm.state()))
                .collect()
        })
    }
}

impl Handler<StopActor> for AlarmMonitorActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("AlarmMonitorActor received stop signal");
        ctx.stop();
    }
}
