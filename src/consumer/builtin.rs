use async_trait::async_trait;

use super::Consumer;
use crate::access::ScopedWriter;
use crate::error::ConsumerError;
use crate::event::{Event, KeyPrefix};

/// Logs every event it receives
pub struct LoggingConsumer {
    name: String,
}

impl LoggingConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Consumer for LoggingConsumer {
    async fn handle(&self, event: &Event) -> Result<(), ConsumerError> {
        tracing::info!(
            consumer = %self.name,
            event_id = %event.id,
            source = %event.source,
            detail_type = %event.detail_type,
            event_type = ?event.attribute("eventType"),
            "📨 Event received"
        );
        Ok(())
    }
}

/// Alarm notification subscriber; delivery to the mailbox itself is out of
/// process, here it is a structured log line
pub struct EmailNotifier {
    address: String,
}

impl EmailNotifier {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }
}

#[async_trait]
impl Consumer for EmailNotifier {
    async fn handle(&self, event: &Event) -> Result<(), ConsumerError> {
        tracing::warn!(
            to = %self.address,
            alarm = ?event.detail_str("alarmName"),
            state = ?event.detail_str("newState"),
            reason = ?event.detail_str("reason"),
            "📧 Alarm notification"
        );
        Ok(())
    }
}

/// Records events into the ledger under `<prefix><detail[id_field]>`
pub struct EventRecorder {
    writer: ScopedWriter,
    prefix: KeyPrefix,
    id_field: &'static str,
}

impl EventRecorder {
    pub fn new(writer: ScopedWriter, prefix: KeyPrefix, id_field: &'static str) -> Self {
        Self {
            writer,
            prefix,
            id_field,
        }
    }
}

#[async_trait]
impl Consumer for EventRecorder {
    async fn handle(&self, event: &Event) -> Result<(), ConsumerError> {
        let id = event
            .detail_str(self.id_field)
            .ok_or_else(|| ConsumerError::rejected(format!("event has no `{}`", self.id_field)))?;
        let key = self.prefix.key(id);

        self.writer
            .write(&key, event.clone())
            .await
            .map_err(|e| ConsumerError::rejected(e.to_string()))
    }
}
