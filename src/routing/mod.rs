// ============================================================================
// Routing - topic fan-out and pattern-matching event bus
// ============================================================================

mod archive;
mod bus;
mod target;
mod topic;

pub use archive::{Archive, REPLAY_ATTRIBUTE};
pub use bus::{BusPublishReport, EventBus, Rule};
pub use target::{DeliveryOutcome, DeliveryRecord, Target};
pub use topic::{FilterPolicy, PublishReport, SubscriptionId, Topic};
