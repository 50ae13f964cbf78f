// ============================================================================
// Events - envelope, taxonomy and routing predicates
// ============================================================================

mod envelope;
mod pattern;
mod taxonomy;

pub use envelope::{deserialize_event, serialize_event, Event};
pub use pattern::{EventPattern, FieldPath, Matcher, Predicate};
pub use taxonomy::*;
