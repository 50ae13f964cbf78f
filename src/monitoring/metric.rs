use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::queue::Queue;
use crate::utils::SharedClock;

/// Datapoints older than this are dropped from a series
pub const DEFAULT_SERIES_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Timestamped datapoints of one metric, bounded by a retention window
pub struct MetricSeries {
    name: String,
    retention: Duration,
    points: Mutex<VecDeque<(Instant, f64)>>,
    clock: SharedClock,
}

impl MetricSeries {
    pub fn new(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            retention: DEFAULT_SERIES_RETENTION,
            points: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, value: f64) {
        let now = self.clock.now();
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        while let Some((at, _)) = points.front() {
            if now.saturating_duration_since(*at) <= self.retention {
                break;
            }
            points.pop_front();
        }
        points.push_back((now, value));
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Values recorded in the window `(now - period, now]`
    pub fn window(&self, period: Duration) -> Vec<f64> {
        let now = self.clock.now();
        self.collect(now.checked_sub(period), now)
    }

    /// Values recorded in `(from, to]`
    pub fn between(&self, from: Instant, to: Instant) -> Vec<f64> {
        self.collect(Some(from), to)
    }

    fn collect(&self, from: Option<Instant>, to: Instant) -> Vec<f64> {
        let points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        points
            .iter()
            .filter(|(at, _)| *at <= to && from.map_or(true, |from| *at > from))
            .map(|(_, value)| *value)
            .collect()
    }
}

/// Which queue counter a gauge samples
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMetric {
    ApproximateNumberOfMessagesVisible,
    ApproximateAgeOfOldestMessage,
}

/// Periodically sampled queue counter feeding a series
pub struct QueueGauge {
    queue: Arc<Queue>,
    metric: QueueMetric,
    series: Arc<MetricSeries>,
}

impl QueueGauge {
    pub fn new(queue: Arc<Queue>, metric: QueueMetric, series: Arc<MetricSeries>) -> Self {
        Self { queue, metric, series }
    }

    pub fn series(&self) -> &Arc<MetricSeries> {
        &self.series
    }

    pub async fn sample(&self) -> f64 {
        let stats = self.queue.stats().await;
        let value = match self.metric {
            QueueMetric::ApproximateNumberOfMessagesVisible => stats.visible as f64,
            QueueMetric::ApproximateAgeOfOldestMessage => stats.oldest_message_age.as_secs_f64(),
        };
        self.series.record(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::metrics::Metrics;
    use crate::utils::FakeClock;

    #[test]
    fn test_window_selects_recent_points() {
        let clock = FakeClock::new();
        clock.advance(Duration::from_secs(600));
        let series = MetricSeries::new("errors", clock.shared());

        series.record(1.0);
        clock.advance(Duration::from_secs(90));
        series.record(2.0);
        clock.advance(Duration::from_secs(60));
        series.record(3.0);

        assert_eq!(series.window(Duration::from_secs(120)), vec![2.0, 3.0]);
        assert_eq!(series.window(Duration::from_secs(30)), vec![3.0]);
    }

    #[test]
    fn test_between_excludes_the_lower_bound() {
        let clock = FakeClock::new();
        let series = MetricSeries::new("age", clock.shared());
        let start = series.now();

        series.record(1.0);
        clock.advance(Duration::from_secs(60));
        series.record(2.0);
        clock.advance(Duration::from_secs(60));
        series.record(3.0);

        let end = start + Duration::from_secs(120);
        assert_eq!(series.between(start, end), vec![2.0, 3.0]);
        assert_eq!(series.between(end, end + Duration::from_secs(120)), Vec::<f64>::new());
    }

    #[test]
    fn test_retention_drops_old_points() {
        let clock = FakeClock::new();
        let series = MetricSeries::new("errors", clock.shared()).with_retention(Duration::from_secs(10));

        series.record(1.0);
        clock.advance(Duration::from_secs(11));
        series.record(2.0);

        assert_eq!(series.window(Duration::from_secs(3600)), vec![2.0]);
    }

    #[tokio::test]
    async fn test_queue_gauge_samples_depth_and_age() {
        let clock = FakeClock::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = Arc::new(Queue::new("invoice-import-timeout", clock.shared(), metrics));
        for _ in 0..3 {
            queue.send(Event::new("app.invoice", "invoice")).await;
        }
        clock.advance(Duration::from_secs(45));

        let depth = QueueGauge::new(
            queue.clone(),
            QueueMetric::ApproximateNumberOfMessagesVisible,
            Arc::new(MetricSeries::new("visible", clock.shared())),
        );
        let age = QueueGauge::new(
            queue,
            QueueMetric::ApproximateAgeOfOldestMessage,
            Arc::new(MetricSeries::new("age", clock.shared())),
        );

        assert_eq!(depth.sample().await, 3.0);
        assert_eq!(age.sample().await, 45.0);
        assert_eq!(depth.series().window(Duration::from_secs(60)), vec![3.0]);
    }
}
