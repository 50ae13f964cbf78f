use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::buffer::Queue;
use crate::consumer::FunctionTarget;
use crate::error::ConsumerError;
use crate::event::Event;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult, SharedClock};

// ============================================================================
// Change Stream Processing - ordered batches with bisect-on-error
// ============================================================================
//
// A change stream is an append-only log read in order from a checkpoint.
// Records expire after the retention window whether or not they were read.
// A failing batch is split in half and each half is processed on its own, so
// one poison record cannot hold the rest of the batch back. A single record
// that keeps failing is retried `retry_attempts` times and then handed to the
// on-failure queue, after which the checkpoint moves past it.
//
// ============================================================================

/// How long a change record stays readable
pub const DEFAULT_STREAM_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    pub sequence_number: u64,
    pub event: Event,
}

#[derive(Default)]
struct StreamLog {
    next_sequence: u64,
    records: VecDeque<(Instant, StreamRecord)>,
}

pub struct ChangeStream {
    name: String,
    retention: Duration,
    clock: SharedClock,
    log: Mutex<StreamLog>,
}

impl ChangeStream {
    pub fn new(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            retention: DEFAULT_STREAM_RETENTION,
            clock,
            log: Mutex::new(StreamLog::default()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a change record and return its sequence number
    pub async fn append(&self, event: Event) -> u64 {
        let now = self.clock.now();
        let mut log = self.log.lock().await;
        self.trim(&mut log, now);

        let sequence_number = log.next_sequence;
        log.next_sequence += 1;
        log.records.push_back((now, StreamRecord { sequence_number, event }));
        sequence_number
    }

    /// Retained records with a sequence number of at least `from`, at most
    /// `limit`. Records past retention are gone even if never read.
    pub async fn read(&self, from: u64, limit: usize) -> Vec<StreamRecord> {
        let mut log = self.log.lock().await;
        self.trim(&mut log, self.clock.now());
        log.records
            .iter()
            .map(|(_, record)| record)
            .skip_while(|record| record.sequence_number < from)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of records still retained
    pub async fn retained(&self) -> usize {
        self.log.lock().await.records.len()
    }

    fn trim(&self, log: &mut StreamLog, now: Instant) {
        let mut trimmed = 0;
        while let Some((at, _)) = log.records.front() {
            if now.saturating_duration_since(*at) <= self.retention {
                break;
            }
            log.records.pop_front();
            trimmed += 1;
        }
        if trimmed > 0 {
            tracing::debug!(stream = %self.name, trimmed, "Change records expired");
        }
    }
}

#[derive(Clone)]
pub struct StreamConfig {
    pub batch_size: usize,
    pub bisect_on_error: bool,
    pub retry_attempts: u32,
    pub on_failure: Option<Arc<Queue>>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            bisect_on_error: true,
            retry_attempts: 3,
            on_failure: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub batches: usize,
    pub processed: usize,
    pub sent_to_on_failure: usize,
    pub discarded: usize,
}

pub struct StreamProcessor {
    stream: Arc<ChangeStream>,
    function: Arc<FunctionTarget>,
    config: StreamConfig,
    checkpoint: Mutex<u64>,
}

impl StreamProcessor {
    pub fn new(stream: Arc<ChangeStream>, function: Arc<FunctionTarget>, config: StreamConfig) -> Self {
        Self {
            stream,
            function,
            config,
            checkpoint: Mutex::new(0),
        }
    }

    /// Next sequence number to be read
    pub async fn checkpoint(&self) -> u64 {
        *self.checkpoint.lock().await
    }

    /// Drain everything appended since the checkpoint
    pub async fn process_available(&self) -> StreamReport {
        // one drain at a time keeps records in order
        let mut checkpoint = self.checkpoint.lock().await;
        let mut report = StreamReport::default();
        let batch_size = self.config.batch_size.max(1);

        loop {
            let batch = self.stream.read(*checkpoint, batch_size).await;
            let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
                break;
            };
            let (first, last) = (first.sequence_number, last.sequence_number);
            if first > *checkpoint {
                tracing::warn!(
                    stream = %self.stream.name(),
                    expired = first - *checkpoint,
                    "Change records expired before they were processed"
                );
            }

            report.batches += 1;
            self.process_batch(&batch, &mut report).await;
            *checkpoint = last + 1;
        }

        if report.batches > 0 {
            tracing::debug!(
                stream = %self.stream.name(),
                function = %self.function.name(),
                processed = report.processed,
                failed = report.sent_to_on_failure + report.discarded,
                "Stream records processed"
            );
        }
        report
    }

    fn process_batch<'a>(&'a self, records: &'a [StreamRecord], report: &'a mut StreamReport) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let events: Vec<Event> = records.iter().map(|r| r.event.clone()).collect();
            let error = match self.function.invoke_batch(&events).await {
                Ok(()) => {
                    report.processed += records.len();
                    return;
                }
                Err(e) => e,
            };

            if self.config.bisect_on_error && records.len() > 1 {
                let (left, right) = records.split_at(records.len() / 2);
                tracing::warn!(
                    stream = %self.stream.name(),
                    batch = records.len(),
                    error = %error,
                    "✂️ Batch failed, bisecting"
                );
                self.process_batch(left, report).await;
                self.process_batch(right, report).await;
                return;
            }

            let retried = if self.config.retry_attempts == 0 {
                RetryResult::Failed(error)
            } else {
                retry_with_backoff(RetryConfig::immediate(self.config.retry_attempts), |_| {
                    self.function.invoke_batch(&events)
                })
                .await
            };

            match retried {
                RetryResult::Success(()) => report.processed += records.len(),
                RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => {
                    self.route_failed(records, &e, report).await;
                }
            }
        })
    }

    async fn route_failed(&self, records: &[StreamRecord], error: &ConsumerError, report: &mut StreamReport) {
        let Some(queue) = &self.config.on_failure else {
            tracing::error!(
                stream = %self.stream.name(),
                records = records.len(),
                error = %error,
                "❌ Records exhausted retries with no on-failure destination, skipping"
            );
            report.discarded += records.len();
            return;
        };

        for record in records {
            tracing::error!(
                stream = %self.stream.name(),
                sequence_number = record.sequence_number,
                on_failure = %queue.name(),
                error = %error,
                "❌ Record exhausted retries, sending to on-failure queue"
            );
            let failed = record
                .event
                .clone()
                .with_attribute("streamName", self.stream.name())
                .with_attribute("streamSequenceNumber", record.sequence_number.to_string())
                .with_attribute("errorMessage", error.to_string());
            queue.send(failed).await;
            report.sent_to_on_failure += 1;
        }
    }
}
