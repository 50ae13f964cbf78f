use std::time::Duration;

use crate::utils::IsTransient;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// Validation failures are rejected before any handler runs. Domain failures
// travel as events. Consumer failures are retried and finally dead-lettered,
// so none of the errors below ever reach the original publisher.
//
// ============================================================================

/// Failure reported by a consumer invocation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsumerError {
    /// Transient processing failure, eligible for redelivery
    #[error("consumer failed: {0}")]
    Failed(String),

    /// The consumer refuses the event outright; retrying cannot help
    #[error("consumer rejected event: {0}")]
    Rejected(String),

    /// The invocation exceeded its timeout and was abandoned
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
}

impl ConsumerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

impl IsTransient for ConsumerError {
    fn is_transient(&self) -> bool {
        !matches!(self, ConsumerError::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("queue {queue}: unknown or expired receipt handle {receipt}")]
    UnknownReceipt { queue: String, receipt: String },
}

/// A delivery that could not be completed and has nowhere left to go
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("target {target} failed without an on-failure destination: {source}")]
    Dropped {
        target: String,
        #[source]
        source: ConsumerError,
    },

    /// The invocation task panicked or was cancelled
    #[error("invocation of {target} aborted: {reason}")]
    Aborted { target: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("event pattern must be a JSON object")]
    NotAnObject,

    #[error("pattern field `{field}` must be an array of allowed values or a nested object")]
    InvalidField { field: String },

    #[error("unsupported content filter in `{field}`: {filter}")]
    UnsupportedFilter { field: String, filter: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("rule {0} already exists on this bus")]
    DuplicateRule(String),

    #[error("rule {0} has an empty event pattern")]
    EmptyPattern(String),

    #[error("rule {0} has no targets")]
    NoTargets(String),

    #[error("archive {0} is not attached to this bus")]
    UnknownArchive(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RealtimeError {
    #[error("realtime api requires a {0} route handler")]
    MissingLifecycleHandler(&'static str),

    #[error("connection {0} is not open")]
    NotConnected(String),

    #[error("no route for action `{0}` and no $default route")]
    NoRoute(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("route {route} failed: {source}")]
    Handler {
        route: String,
        #[source]
        source: ConsumerError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("productIds must contain at least one item")]
    EmptyProductIds,

    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("writer {writer} may not write partition key {key}")]
    KeyNotPermitted { writer: String, key: String },
}
