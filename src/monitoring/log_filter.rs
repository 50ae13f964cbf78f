use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};

use super::metric::MetricSeries;

/// Turns log lines containing `literal` into datapoints of `series`
pub struct LogMetricFilter {
    literal: String,
    value: f64,
    series: Arc<MetricSeries>,
}

impl LogMetricFilter {
    pub fn new(literal: impl Into<String>, series: Arc<MetricSeries>) -> Self {
        Self {
            literal: literal.into(),
            value: 1.0,
            series,
        }
    }

    pub fn series(&self) -> Arc<MetricSeries> {
        self.series.clone()
    }
}

/// `tracing` layer applying log metric filters to every event's message
pub struct LogMetricLayer {
    filters: Vec<LogMetricFilter>,
}

impl LogMetricLayer {
    pub fn new(filters: Vec<LogMetricFilter>) -> Self {
        Self { filters }
    }
}

impl<S: Subscriber> Layer<S> for LogMetricLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        for filter in &self.filters {
            if visitor.message.contains(filter.literal.as_str()) {
                filter.series.record(filter.value);
            }
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::FakeClock;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_matching_log_lines_become_datapoints() {
        let clock = FakeClock::new();
        let series = Arc::new(MetricSeries::new("OrderWithNonValidProduct", clock.shared()));
        let layer = LogMetricLayer::new(vec![LogMetricFilter::new("Some product was not found", series.clone())]);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(product_id = "p-1", "Some product was not found");
            tracing::info!("Order created");
            tracing::warn!("Some product was not found: {}", "p-2");
        });

        assert_eq!(series.window(Duration::from_secs(120)), vec![1.0, 1.0]);
    }
}
