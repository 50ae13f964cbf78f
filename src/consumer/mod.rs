// ============================================================================
// Consumers - the function bodies events are delivered to
// ============================================================================
//
// The engine never knows what a consumer does. It only bounds each
// invocation with a timeout and decides, from the returned error, whether
// the event is retried, released back to its queue, or dead-lettered.
//
// ============================================================================

mod builtin;
mod function;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;

use crate::error::ConsumerError;
use crate::event::Event;

pub use builtin::{EmailNotifier, EventRecorder, LoggingConsumer};
pub use function::{FunctionTarget, DEFAULT_FUNCTION_TIMEOUT};

#[async_trait]
pub trait Consumer: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), ConsumerError>;

    /// Batch entry point for queue pollers and stream processors; the batch
    /// fails as a whole on the first failing record
    async fn handle_batch(&self, events: &[Event]) -> Result<(), ConsumerError> {
        for event in events {
            self.handle(event).await?;
        }
        Ok(())
    }
}
