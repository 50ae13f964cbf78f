use std::collections::HashMap;
use std::time::Duration;

use super::buffer::{MessageId, Queue};
use crate::event::Event;

// ============================================================================
// Dead Letter Inspection
// ============================================================================
//
// Poison messages are never dropped: they sit in a dead-letter queue until a
// human looks at them. These operations support that:
// - Non-destructive listing of dead-lettered messages
// - Statistics by source queue and detail type
// - Redrive back to a queue once the cause is fixed
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct DlqMessage {
    pub message_id: MessageId,
    pub event: Event,
    pub source_queue: Option<String>,
    pub age: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DlqStats {
    pub total_messages: usize,
    pub by_source_queue: HashMap<String, usize>,
    pub by_detail_type: HashMap<String, usize>,
}

impl Queue {
    /// List up to `limit` visible messages without receiving them
    pub async fn peek(&self, limit: usize) -> Vec<DlqMessage> {
        let now = self.clock.now();
        let state = self.state.lock().await;

        state
            .visible
            .iter()
            .take(limit)
            .map(|m| DlqMessage {
                message_id: m.id,
                event: m.event.clone(),
                source_queue: m.source_queue.clone(),
                age: now.saturating_duration_since(m.sent_at),
            })
            .collect()
    }

    pub async fn dead_letter_stats(&self) -> DlqStats {
        let state = self.state.lock().await;
        let mut stats = DlqStats {
            total_messages: state.visible.len(),
            ..DlqStats::default()
        };

        for message in &state.visible {
            let source = message.source_queue.clone().unwrap_or_else(|| "unknown".to_string());
            *stats.by_source_queue.entry(source).or_insert(0) += 1;
            *stats
                .by_detail_type
                .entry(message.event.detail_type.clone())
                .or_insert(0) += 1;
        }

        stats
    }

    /// Move up to `limit` visible messages to `target` with a fresh receive
    /// budget. Returns how many were moved.
    pub async fn redrive(&self, target: &Queue, limit: usize) -> usize {
        let moved = {
            let mut state = self.state.lock().await;
            let count = limit.min(state.visible.len());
            state.visible.drain(..count).collect::<Vec<_>>()
        };
        let count = moved.len();

        if count > 0 {
            tracing::info!(
                from = %self.name(),
                to = %target.name(),
                count = count,
                "Redriving dead-lettered messages"
            );
        }

        target.accept_redriven(moved).await;
        // refresh this queue's gauges after the drain
        let _ = self.stats().await;
        count
    }
}
