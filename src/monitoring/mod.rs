// ============================================================================
// Monitoring - metric series, log metric filters and alarms
// ============================================================================

mod alarm;
mod log_filter;
mod metric;

pub use alarm::{
    run_actions, Alarm, AlarmConfig, AlarmState, AlarmTransition, Comparator, MissingDataPolicy, Statistic,
};
pub use log_filter::{LogMetricFilter, LogMetricLayer};
pub use metric::{MetricSeries, QueueGauge, QueueMetric, DEFAULT_SERIES_RETENTION};
