use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::archive::{Archive, REPLAY_ATTRIBUTE};
use super::target::{settle, DeliveryRecord, Fanout, InFlight, Target};
use crate::error::RoutingError;
use crate::event::{Event, EventPattern};
use crate::metrics::Metrics;

// ============================================================================
// Event Bus - content-based routing by structural pattern
// ============================================================================
//
// Rules are evaluated independently: an event matching several rules is
// dispatched by each of them, and each rule delivers exactly once to each of
// its targets. Function targets run on their own tasks, as on a topic.
// Archives tap every event crossing the bus, whether or not a rule matched
// it.
//
// ============================================================================

pub struct Rule {
    name: String,
    description: String,
    pattern: EventPattern,
    targets: Vec<Target>,
    enabled: AtomicBool,
}

impl Rule {
    pub fn new(name: impl Into<String>, pattern: EventPattern) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pattern,
            targets: Vec::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Parse the rule's pattern from its JSON form
    pub fn from_json(name: impl Into<String>, pattern: &serde_json::Value) -> Result<Self, RoutingError> {
        Ok(Self::new(name, EventPattern::from_json(pattern)?))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<Target>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn disabled(self) -> Self {
        self.enabled.store(false, Ordering::SeqCst);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn matches(&self, event: &Event) -> bool {
        self.is_enabled() && self.pattern.matches(event)
    }
}

#[derive(Debug)]
pub struct BusPublishReport {
    pub event_id: Uuid,
    pub matched_rules: Vec<String>,
    pub deliveries: Vec<DeliveryRecord>,
    pub archived_in: Vec<String>,
    in_flight: Vec<InFlight>,
}

impl BusPublishReport {
    /// Wait for every dispatched rule target to finish
    pub async fn settled(mut self) -> Self {
        let in_flight = std::mem::take(&mut self.in_flight);
        settle(&mut self.deliveries, in_flight).await;
        self
    }
}

pub struct EventBus {
    name: String,
    rules: RwLock<Vec<Arc<Rule>>>,
    archives: RwLock<Vec<Arc<Archive>>>,
    metrics: Arc<Metrics>,
}

impl EventBus {
    pub fn new(name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            rules: RwLock::new(Vec::new()),
            archives: RwLock::new(Vec::new()),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put_rule(&self, rule: Rule) -> Result<(), RoutingError> {
        if rule.pattern.is_empty() {
            return Err(RoutingError::EmptyPattern(rule.name));
        }
        if rule.targets.is_empty() {
            return Err(RoutingError::NoTargets(rule.name));
        }

        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.name == rule.name) {
            return Err(RoutingError::DuplicateRule(rule.name));
        }

        tracing::info!(
            bus = %self.name,
            rule = %rule.name,
            description = %rule.description,
            targets = rule.targets.len(),
            "Rule added"
        );
        rules.push(Arc::new(rule));
        Ok(())
    }

    pub async fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    pub async fn set_rule_enabled(&self, name: &str, enabled: bool) -> bool {
        let rules = self.rules.read().await;
        match rules.iter().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled.store(enabled, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn add_archive(&self, archive: Arc<Archive>) {
        tracing::info!(bus = %self.name, archive = %archive.name(), "Archive attached");
        self.archives.write().await.push(archive);
    }

    pub async fn archive(&self, name: &str) -> Option<Arc<Archive>> {
        self.archives.read().await.iter().find(|a| a.name() == name).cloned()
    }

    pub async fn publish(&self, event: Event) -> BusPublishReport {
        self.metrics.record_publish(&self.name);

        let archives: Vec<Arc<Archive>> = self.archives.read().await.clone();
        let mut archived_in = Vec::new();
        for archive in &archives {
            if archive.record(&event).await {
                archived_in.push(archive.name().to_string());
            }
        }

        let matched: Vec<Arc<Rule>> = self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.matches(&event))
            .cloned()
            .collect();

        if matched.is_empty() {
            tracing::debug!(bus = %self.name, event_id = %event.id, source = %event.source, "No rule matched");
        }

        let mut fanout = Fanout::default();
        for rule in &matched {
            for target in &rule.targets {
                tracing::debug!(bus = %self.name, rule = %rule.name, target = %target.name(), "🎯 Rule matched");
                fanout.deliver(target, &self.name, event.clone(), &self.metrics).await;
            }
        }

        BusPublishReport {
            event_id: event.id,
            matched_rules: matched.iter().map(|r| r.name.clone()).collect(),
            deliveries: fanout.records,
            archived_in,
            in_flight: fanout.in_flight,
        }
    }

    /// Re-publish every retained event of an archive to the current rules.
    /// Replayed events carry the `replay-name` attribute and are not archived
    /// again.
    pub async fn replay(&self, archive_name: &str) -> Result<Vec<BusPublishReport>, RoutingError> {
        let archive = self
            .archive(archive_name)
            .await
            .ok_or_else(|| RoutingError::UnknownArchive(archive_name.to_string()))?;

        let events = archive.events().await;
        tracing::info!(bus = %self.name, archive = %archive_name, events = events.len(), "🔁 Replaying archive");

        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            reports.push(self.publish(event.with_attribute(REPLAY_ATTRIBUTE, archive_name)).await);
        }
        Ok(reports)
    }
}
