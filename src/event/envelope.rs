use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Event Envelope - common shape of every routed domain event
// ============================================================================
//
// `source` and `detail_type` are stable taxonomic tags used for routing,
// `detail` is a free-form payload that bus rules inspect by path, and
// `attributes` carry the message attributes topic filter policies match on.
//
// Events are immutable once published: every subscriber receives its own
// clone and nothing updates an event in place.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub detail: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            detail_type: detail_type.into(),
            time: Utc::now(),
            detail: Map::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Build an event from a JSON detail object; non-object payloads are
    /// wrapped under a `payload` key
    pub fn with_detail_value(mut self, detail: Value) -> Self {
        match detail {
            Value::Object(map) => self.detail = map,
            other => {
                self.detail.insert("payload".to_string(), other);
            }
        }
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Look up a nested value under `detail`
    pub fn detail_at(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.detail.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail.get(key).and_then(Value::as_str)
    }
}

pub fn serialize_event(event: &Event) -> anyhow::Result<String> {
    Ok(serde_json::to_string(event)?)
}

pub fn deserialize_event(json: &str) -> anyhow::Result<Event> {
    Ok(serde_json::from_str(json)?)
}
