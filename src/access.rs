use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::AccessError;
use crate::event::{Event, KeyPrefix, OrderEventType};

// ============================================================================
// Leading-Key Write Policy
// ============================================================================
//
// Each writer is granted a set of partition-key patterns (`*` matches any run
// of characters, `?` exactly one). A write outside the grant is refused
// before it reaches the ledger.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct LeadingKeyPolicy {
    writer: String,
    allowed: Vec<String>,
}

impl LeadingKeyPolicy {
    pub fn new(writer: impl Into<String>) -> Self {
        Self {
            writer: writer.into(),
            allowed: Vec::new(),
        }
    }

    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allowed.push(pattern.into());
        self
    }

    pub fn allow_prefix(self, prefix: KeyPrefix) -> Self {
        self.allow(prefix.pattern())
    }

    pub fn writer(&self) -> &str {
        &self.writer
    }

    pub fn permits(&self, key: &str) -> bool {
        self.allowed.iter().any(|pattern| string_like(pattern, key))
    }

    pub fn check(&self, key: &str) -> Result<(), AccessError> {
        if self.permits(key) {
            Ok(())
        } else {
            Err(AccessError::KeyNotPermitted {
                writer: self.writer.clone(),
                key: key.to_string(),
            })
        }
    }
}

/// Glob match with `*` and `?` wildcards
fn string_like(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();

    let (mut p, mut v) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = v;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            v = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Append-only event history keyed by partition key
#[derive(Default)]
pub struct EventLedger {
    entries: RwLock<BTreeMap<String, Vec<Event>>>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history(&self, key: &str) -> Vec<Event> {
        self.entries.read().await.get(key).cloned().unwrap_or_default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Order events recorded for one customer email, optionally narrowed to
    /// a single event type
    pub async fn order_events_by_email(&self, email: &str, event_type: Option<OrderEventType>) -> Vec<Event> {
        let order_keys = KeyPrefix::Order.key("");
        self.entries
            .read()
            .await
            .range(order_keys.clone()..)
            .take_while(|(key, _)| key.starts_with(&order_keys))
            .flat_map(|(_, events)| events.iter())
            .filter(|event| event.detail_str("email") == Some(email))
            .filter(|event| event_type.map_or(true, |t| event.order_event_type() == Some(t)))
            .cloned()
            .collect()
    }

    async fn append(&self, key: String, event: Event) {
        self.entries.write().await.entry(key).or_default().push(event);
    }
}

/// Ledger handle restricted to one writer's key grant
#[derive(Clone)]
pub struct ScopedWriter {
    ledger: Arc<EventLedger>,
    policy: LeadingKeyPolicy,
}

impl ScopedWriter {
    pub fn new(ledger: Arc<EventLedger>, policy: LeadingKeyPolicy) -> Self {
        Self { ledger, policy }
    }

    pub async fn write(&self, key: &str, event: Event) -> Result<(), AccessError> {
        if let Err(e) = self.policy.check(key) {
            tracing::warn!(writer = %self.policy.writer(), key = %key, "🚫 Write outside key grant refused");
            return Err(e);
        }
        self.ledger.append(key.to_string(), event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_like_wildcards() {
        assert!(string_like("#order_*", "#order_42"));
        assert!(string_like("#order_*", "#order_"));
        assert!(!string_like("#order_*", "#invoice_42"));
        assert!(string_like("#transaction", "#transaction"));
        assert!(!string_like("#transaction", "#transaction_1"));
        assert!(string_like("#product_??", "#product_ab"));
        assert!(!string_like("#product_??", "#product_abc"));
        assert!(string_like("*_*", "#order_1"));
    }

    #[test]
    fn test_policy_allows_only_granted_prefixes() {
        let policy = LeadingKeyPolicy::new("invoice-events")
            .allow_prefix(KeyPrefix::Invoice)
            .allow_prefix(KeyPrefix::Transaction);

        assert!(policy.permits("#invoice_123"));
        assert!(policy.permits("#transaction"));
        assert_eq!(
            policy.check("#order_1"),
            Err(AccessError::KeyNotPermitted {
                writer: "invoice-events".to_string(),
                key: "#order_1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_scoped_writer_enforces_grant() {
        let ledger = Arc::new(EventLedger::new());
        let writer = ScopedWriter::new(ledger.clone(), LeadingKeyPolicy::new("orders").allow_prefix(KeyPrefix::Order));

        writer.write("#order_1", Event::new("app.order", "order")).await.unwrap();
        assert!(writer.write("#product_1", Event::new("app.order", "order")).await.is_err());

        assert_eq!(ledger.history("#order_1").await.len(), 1);
        assert_eq!(ledger.keys().await, vec!["#order_1".to_string()]);
    }

    #[tokio::test]
    async fn test_order_events_by_email() {
        let ledger = Arc::new(EventLedger::new());
        let orders = ScopedWriter::new(ledger.clone(), LeadingKeyPolicy::new("orders").allow_prefix(KeyPrefix::Order));
        let products =
            ScopedWriter::new(ledger.clone(), LeadingKeyPolicy::new("products").allow_prefix(KeyPrefix::Product));

        let order = |event_type, email: &str| Event::order_lifecycle(event_type).with_detail("email", email);
        orders.write("#order_1", order(OrderEventType::OrderCreated, "a@b.com")).await.unwrap();
        orders.write("#order_1", order(OrderEventType::OrderDeleted, "a@b.com")).await.unwrap();
        orders.write("#order_2", order(OrderEventType::OrderCreated, "c@d.com")).await.unwrap();
        products
            .write("#product_1", Event::new("app.product", "product").with_detail("email", "a@b.com"))
            .await
            .unwrap();

        assert_eq!(ledger.order_events_by_email("a@b.com", None).await.len(), 2);

        let deleted = ledger
            .order_events_by_email("a@b.com", Some(OrderEventType::OrderDeleted))
            .await;
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].order_event_type(), Some(OrderEventType::OrderDeleted));

        assert!(ledger.order_events_by_email("nobody@b.com", None).await.is_empty());
    }
}
