use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::target::{settle, DeliveryRecord, Fanout, InFlight, Target};
use crate::event::{Event, FieldPath, Predicate};
use crate::metrics::Metrics;

// ============================================================================
// Topic - pub/sub fan-out with per-subscription filter policies
// ============================================================================
//
// Publishing evaluates every subscription's filter against the event's
// message attributes and delivers an independent copy to each match. Queue
// subscribers are enqueued before publish returns; function subscribers are
// invoked on their own tasks, so their retries and timeouts never hold up
// the publisher. A failing subscriber shows up in the metrics, the
// on-failure queue and a settled report, never in the publishing call.
//
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Attribute name to allow-list. All listed attributes must be present with
/// an allowed value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterPolicy {
    allow: BTreeMap<String, Vec<String>>,
}

impl FilterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow
            .entry(attribute.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn to_predicate(&self) -> Predicate {
        Predicate::All(
            self.allow
                .iter()
                .map(|(attribute, values)| Predicate::one_of(FieldPath::Attribute(attribute.clone()), values.clone()))
                .collect(),
        )
    }
}

struct Subscription {
    id: SubscriptionId,
    name: String,
    target: Target,
    filter: Option<Predicate>,
}

impl Subscription {
    fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().map_or(true, |p| p.matches(event))
    }
}

#[derive(Debug)]
pub struct PublishReport {
    pub event_id: Uuid,
    pub deliveries: Vec<DeliveryRecord>,
    in_flight: Vec<InFlight>,
}

impl PublishReport {
    /// Wait for every dispatched invocation, including retries, and replace
    /// its `Dispatched` entry with the final outcome
    pub async fn settled(mut self) -> Self {
        let in_flight = std::mem::take(&mut self.in_flight);
        settle(&mut self.deliveries, in_flight).await;
        self
    }

    pub fn delivered_to(&self) -> Vec<&str> {
        self.deliveries.iter().map(|d| d.target.as_str()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryRecord> {
        self.deliveries.iter().filter(|d| !d.is_success())
    }
}

pub struct Topic {
    name: String,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    metrics: Arc<Metrics>,
}

impl Topic {
    pub fn new(name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            subscriptions: RwLock::new(Vec::new()),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a subscriber; `None` receives every event
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        target: impl Into<Target>,
        filter: Option<FilterPolicy>,
    ) -> SubscriptionId {
        let subscription = Subscription {
            id: SubscriptionId(Uuid::new_v4()),
            name: name.into(),
            target: target.into(),
            filter: filter.as_ref().map(FilterPolicy::to_predicate),
        };
        let id = subscription.id;

        tracing::info!(
            topic = %self.name,
            subscription = %subscription.name,
            target = %subscription.target.name(),
            filtered = subscription.filter.is_some(),
            "Subscription added"
        );
        self.subscriptions.write().await.push(Arc::new(subscription));
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn publish(&self, event: Event) -> PublishReport {
        self.metrics.record_publish(&self.name);

        // snapshot, so no lock is held while consumers run
        let matching: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.accepts(&event))
            .cloned()
            .collect();

        tracing::debug!(
            topic = %self.name,
            event_id = %event.id,
            matched = matching.len(),
            "📣 Publishing to topic"
        );

        let mut fanout = Fanout::default();
        for subscription in &matching {
            fanout
                .deliver(&subscription.target, &self.name, event.clone(), &self.metrics)
                .await;
        }

        PublishReport {
            event_id: event.id,
            deliveries: fanout.records,
            in_flight: fanout.in_flight,
        }
    }
}
