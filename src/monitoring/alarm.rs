use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::metric::MetricSeries;
use crate::event::{Event, ALARM_DETAIL_TYPE, ALARM_SOURCE};
use crate::metrics::Metrics;
use crate::routing::{PublishReport, Topic};

// ============================================================================
// Alarm Evaluation - threshold with consecutive-period hysteresis
// ============================================================================
//
// Evaluation walks the series in back-to-back windows of `period`: the first
// call reads the most recent period, later calls read only windows that have
// closed since, so a datapoint never counts toward two windows however often
// the monitor runs. Each window is reduced to a single statistic and compared
// with the threshold. The alarm fires only after
// `evaluation_periods` consecutive breaching windows; a single
// non-breaching window resets the count and clears a firing alarm. Windows
// without datapoints are classified by the missing-data policy.
//
// Firing runs the alarm actions: a notification event published to each
// action topic.
//
// ============================================================================

const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Sum,
    Maximum,
    Minimum,
    Average,
    SampleCount,
}

impl Statistic {
    /// Reduce a non-empty window
    pub fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Statistic::Sum => values.iter().sum(),
            Statistic::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Statistic::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
            Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::SampleCount => values.len() as f64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    GreaterThanOrEqualToThreshold,
    GreaterThanThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl Comparator {
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThanOrEqualToThreshold => value >= threshold,
            Comparator::GreaterThanThreshold => value > threshold,
            Comparator::LessThanThreshold => value < threshold,
            Comparator::LessThanOrEqualToThreshold => value <= threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingDataPolicy {
    #[default]
    NotBreaching,
    Breaching,
    /// Keep the current state and breach count
    Ignore,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmState {
    #[default]
    Ok,
    Alarm,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Ok => "OK",
            AlarmState::Alarm => "ALARM",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct AlarmConfig {
    pub name: String,
    pub description: String,
    pub statistic: Statistic,
    pub period: Duration,
    pub threshold: f64,
    pub comparator: Comparator,
    pub evaluation_periods: u32,
    pub missing_data: MissingDataPolicy,
    pub actions_enabled: bool,
}

impl AlarmConfig {
    /// `statistic >= threshold` over one 2-minute window, the shape every
    /// alarm of the order topology uses
    pub fn threshold(name: impl Into<String>, statistic: Statistic, threshold: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            statistic,
            period: Duration::from_secs(120),
            threshold,
            comparator: Comparator::GreaterThanOrEqualToThreshold,
            evaluation_periods: 1,
            missing_data: MissingDataPolicy::NotBreaching,
            actions_enabled: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_evaluation_periods(mut self, periods: u32) -> Self {
        self.evaluation_periods = periods.max(1);
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(MIN_PERIOD);
        self
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_missing_data(mut self, policy: MissingDataPolicy) -> Self {
        self.missing_data = policy;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlarmTransition {
    pub alarm: String,
    pub from: AlarmState,
    pub to: AlarmState,
    /// Statistic of the deciding window; `None` when it had no datapoints
    pub value: Option<f64>,
    pub reason: String,
}

pub struct Alarm {
    config: AlarmConfig,
    series: Arc<MetricSeries>,
    state: AlarmState,
    consecutive_breaches: u32,
    /// End of the last evaluated window
    evaluated_until: Option<Instant>,
    actions: Vec<Arc<Topic>>,
    metrics: Arc<Metrics>,
}

impl Alarm {
    pub fn new(config: AlarmConfig, series: Arc<MetricSeries>, metrics: Arc<Metrics>) -> Self {
        metrics.update_alarm_state(&config.name, false);
        Self {
            config,
            series,
            state: AlarmState::Ok,
            consecutive_breaches: 0,
            evaluated_until: None,
            actions: Vec::new(),
            metrics,
        }
    }

    /// Topic notified when the alarm fires
    pub fn with_action(mut self, topic: Arc<Topic>) -> Self {
        self.actions.push(topic);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.config
    }

    /// Evaluate every window that closed since the last call. Nothing is
    /// evaluated while the current window is still open.
    pub fn evaluate(&mut self) -> Vec<AlarmTransition> {
        let period = self.config.period.max(MIN_PERIOD);
        let now = self.series.now();
        let mut transitions = Vec::new();

        let Some(mut until) = self.evaluated_until else {
            let values = self.series.window(period);
            transitions.extend(self.evaluate_window(&values));
            self.evaluated_until = Some(now);
            return transitions;
        };

        while now.saturating_duration_since(until) >= period {
            let end = until + period;
            let values = self.series.between(until, end);
            transitions.extend(self.evaluate_window(&values));
            until = end;
        }
        self.evaluated_until = Some(until);

        transitions
    }

    /// Evaluate one window of datapoints and apply the state machine
    pub fn evaluate_window(&mut self, values: &[f64]) -> Option<AlarmTransition> {
        let value = (!values.is_empty()).then(|| self.config.statistic.apply(values));

        let breaching = match value {
            Some(v) => self.config.comparator.breaches(v, self.config.threshold),
            None => match self.config.missing_data {
                MissingDataPolicy::Breaching => true,
                MissingDataPolicy::NotBreaching => false,
                MissingDataPolicy::Ignore => return None,
            },
        };

        let next = if breaching {
            self.consecutive_breaches = self.consecutive_breaches.saturating_add(1);
            if self.consecutive_breaches >= self.config.evaluation_periods {
                AlarmState::Alarm
            } else {
                self.state
            }
        } else {
            self.consecutive_breaches = 0;
            AlarmState::Ok
        };

        if next == self.state {
            return None;
        }

        let transition = AlarmTransition {
            alarm: self.config.name.clone(),
            from: self.state,
            to: next,
            value,
            reason: self.reason(value, breaching),
        };
        self.state = next;

        self.metrics.update_alarm_state(&self.config.name, next == AlarmState::Alarm);
        self.metrics
            .record_alarm_transition(&self.config.name, transition.from.as_str(), transition.to.as_str());

        match next {
            AlarmState::Alarm => tracing::warn!(
                alarm = %self.config.name,
                value = ?value,
                threshold = self.config.threshold,
                "🚨 Alarm fired"
            ),
            AlarmState::Ok => tracing::info!(alarm = %self.config.name, value = ?value, "Alarm back to OK"),
        }

        Some(transition)
    }

    /// Topics to notify for a transition, empty unless it fired an alarm
    /// with actions enabled
    pub fn actions_for(&self, transition: &AlarmTransition) -> Vec<Arc<Topic>> {
        if self.config.actions_enabled && transition.to == AlarmState::Alarm {
            self.actions.clone()
        } else {
            Vec::new()
        }
    }

    pub fn notification(&self, transition: &AlarmTransition) -> Event {
        Event::new(ALARM_SOURCE, ALARM_DETAIL_TYPE)
            .with_detail("alarmName", transition.alarm.clone())
            .with_detail("alarmDescription", self.config.description.clone())
            .with_detail("oldState", transition.from.as_str())
            .with_detail("newState", transition.to.as_str())
            .with_detail("reason", transition.reason.clone())
            .with_detail("value", transition.value)
            .with_detail("threshold", self.config.threshold)
    }

    fn reason(&self, value: Option<f64>, breaching: bool) -> String {
        match value {
            Some(v) => format!(
                "{:?} {} over {}s {} threshold {} ({} consecutive breaching periods)",
                self.config.statistic,
                v,
                self.config.period.as_secs(),
                if breaching { "breached" } else { "within" },
                self.config.threshold,
                self.consecutive_breaches
            ),
            None => format!("no datapoints, treated as {:?}", self.config.missing_data),
        }
    }
}

/// Publish an alarm notification to every action topic
pub async fn run_actions(actions: &[Arc<Topic>], notification: Event) -> Vec<PublishReport> {
    let mut reports = Vec::with_capacity(actions.len());
    for topic in actions {
        let report = topic.publish(notification.clone()).await;
        tracing::info!(
            topic = %topic.name(),
            recipients = report.deliveries.len(),
            "📢 Alarm notification published"
        );
        reports.push(report);
    }
    reports
}
