use serde_json::{Map, Value};
use std::borrow::Cow;

use super::Event;
use crate::error::PatternError;

// ============================================================================
// Event Patterns - a small typed predicate tree
// ============================================================================
//
// Bus rules, archive filters and topic filter policies all compile down to
// `Predicate` and are evaluated by the same code:
//
//   All([
//     Field(source      ∈ {"app.order"}),
//     Field(detail-type ∈ {"order"}),
//     Field(detail.reason ∈ {"PRODUCT_NOT_FOUND"}),
//   ])
//
// Array-valued fields match when any element is allowed.
//
// ============================================================================

/// Location of a value inside an event
#[derive(Clone, Debug, PartialEq)]
pub enum FieldPath {
    Source,
    DetailType,
    Detail(Vec<String>),
    Attribute(String),
}

impl FieldPath {
    /// Parse a dotted path below `detail`, e.g. `invoice.number`
    pub fn detail(path: &str) -> Self {
        FieldPath::Detail(path.split('.').map(str::to_string).collect())
    }

    fn resolve<'a>(&self, event: &'a Event) -> Option<Cow<'a, Value>> {
        match self {
            FieldPath::Source => Some(Cow::Owned(Value::String(event.source.clone()))),
            FieldPath::DetailType => Some(Cow::Owned(Value::String(event.detail_type.clone()))),
            FieldPath::Detail(path) => event.detail_at(path).map(Cow::Borrowed),
            FieldPath::Attribute(name) => event
                .attribute(name)
                .map(|v| Cow::Owned(Value::String(v.to_string()))),
        }
    }
}

/// A single allowed value or content filter
#[derive(Clone, Debug, PartialEq)]
pub enum Matcher {
    Equals(Value),
    Prefix(String),
    Exists(bool),
}

impl Matcher {
    fn matches_scalar(&self, value: &Value) -> bool {
        match self {
            Matcher::Equals(expected) => expected == value,
            Matcher::Prefix(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix.as_str())),
            Matcher::Exists(exists) => *exists,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// The field's value must satisfy at least one matcher
    Field { path: FieldPath, any_of: Vec<Matcher> },
    /// Conjunction; an empty conjunction matches everything
    All(Vec<Predicate>),
    /// Disjunction; an empty disjunction matches nothing
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn one_of<I, V>(path: FieldPath, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::Field {
            path,
            any_of: values.into_iter().map(|v| Matcher::Equals(v.into())).collect(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Predicate::Field { path, any_of } => match path.resolve(event) {
                None => any_of.iter().any(|m| *m == Matcher::Exists(false)),
                Some(value) => match value.as_ref() {
                    Value::Array(items) => any_of.iter().any(|m| match m {
                        Matcher::Exists(exists) => *exists,
                        _ => items.iter().any(|item| m.matches_scalar(item)),
                    }),
                    scalar => any_of.iter().any(|m| m.matches_scalar(scalar)),
                },
            },
            Predicate::All(predicates) => predicates.iter().all(|p| p.matches(event)),
            Predicate::Any(predicates) => predicates.iter().any(|p| p.matches(event)),
        }
    }
}

/// Conjunction of field constraints, as declared by bus rules and archives
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventPattern {
    predicates: Vec<Predicate>,
}

impl EventPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(Predicate::one_of(FieldPath::Source, strings(values)))
    }

    pub fn detail_type<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(Predicate::one_of(FieldPath::DetailType, strings(values)))
    }

    /// Constrain a dotted path below `detail` to a set of string values
    pub fn detail<I, S>(self, path: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(Predicate::one_of(FieldPath::detail(path), strings(values)))
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.predicates.iter().all(|p| p.matches(event))
    }

    /// Parse the JSON pattern syntax:
    /// `{"source": [..], "detail-type": [..], "detail": {"reason": [..]}}`
    pub fn from_json(pattern: &Value) -> Result<Self, PatternError> {
        let object = pattern.as_object().ok_or(PatternError::NotAnObject)?;
        let mut result = EventPattern::new();

        for (key, value) in object {
            match key.as_str() {
                "source" => {
                    result = result.with(field_predicate(FieldPath::Source, key, value)?);
                }
                "detail-type" | "detailType" => {
                    result = result.with(field_predicate(FieldPath::DetailType, key, value)?);
                }
                "detail" => {
                    let nested = value.as_object().ok_or_else(|| PatternError::InvalidField {
                        field: key.clone(),
                    })?;
                    collect_detail(nested, &mut Vec::new(), &mut result.predicates)?;
                }
                other => {
                    return Err(PatternError::InvalidField {
                        field: other.to_string(),
                    })
                }
            }
        }

        Ok(result)
    }
}

fn strings<I, S>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(|s| Value::String(s.into())).collect()
}

fn collect_detail(
    object: &Map<String, Value>,
    prefix: &mut Vec<String>,
    out: &mut Vec<Predicate>,
) -> Result<(), PatternError> {
    for (key, value) in object {
        prefix.push(key.clone());
        match value {
            Value::Object(nested) => collect_detail(nested, prefix, out)?,
            _ => {
                let field = format!("detail.{}", prefix.join("."));
                out.push(field_predicate(FieldPath::Detail(prefix.clone()), &field, value)?);
            }
        }
        prefix.pop();
    }
    Ok(())
}

fn field_predicate(path: FieldPath, field: &str, value: &Value) -> Result<Predicate, PatternError> {
    let items = value.as_array().ok_or_else(|| PatternError::InvalidField {
        field: field.to_string(),
    })?;

    let any_of = items
        .iter()
        .map(|item| parse_matcher(field, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Predicate::Field { path, any_of })
}

fn parse_matcher(field: &str, item: &Value) -> Result<Matcher, PatternError> {
    let Some(filter) = item.as_object() else {
        return Ok(Matcher::Equals(item.clone()));
    };

    let unsupported = || PatternError::UnsupportedFilter {
        field: field.to_string(),
        filter: item.to_string(),
    };

    if filter.len() != 1 {
        return Err(unsupported());
    }

    match filter.iter().next() {
        Some((name, Value::String(prefix))) if name == "prefix" => Ok(Matcher::Prefix(prefix.clone())),
        Some((name, Value::Bool(exists))) if name == "exists" => Ok(Matcher::Exists(*exists)),
        _ => Err(unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_error(reason: &str) -> Event {
        Event::new("app.order", "order").with_detail("reason", reason)
    }

    #[test]
    fn test_builder_pattern_requires_every_constraint() {
        let pattern = EventPattern::new()
            .source(["app.order"])
            .detail_type(["order"])
            .detail("reason", ["PRODUCT_NOT_FOUND"]);

        assert!(pattern.matches(&order_error("PRODUCT_NOT_FOUND")));
        assert!(!pattern.matches(&order_error("OTHER")));

        let wrong_source = Event::new("app.invoice", "order").with_detail("reason", "PRODUCT_NOT_FOUND");
        assert!(!pattern.matches(&wrong_source));
    }

    #[test]
    fn test_missing_detail_field_does_not_match() {
        let pattern = EventPattern::new().detail("reason", ["PRODUCT_NOT_FOUND"]);
        assert!(!pattern.matches(&Event::new("app.order", "order")));
    }

    #[test]
    fn test_json_pattern_with_nested_detail() {
        let pattern = EventPattern::from_json(&json!({
            "source": ["app.invoice"],
            "detail-type": ["invoice"],
            "detail": {
                "errorDetail": ["FAIL_NO_INVOICE_NUMBER", "TIMEOUT"],
                "import": {"stage": [{"prefix": "upload"}]}
            }
        }))
        .unwrap();

        let event = Event::new("app.invoice", "invoice").with_detail_value(json!({
            "errorDetail": "TIMEOUT",
            "import": {"stage": "upload-wait"}
        }));
        assert!(pattern.matches(&event));

        let other_stage = Event::new("app.invoice", "invoice").with_detail_value(json!({
            "errorDetail": "TIMEOUT",
            "import": {"stage": "parse"}
        }));
        assert!(!pattern.matches(&other_stage));
    }

    #[test]
    fn test_array_field_matches_any_element() {
        let pattern = EventPattern::new().detail("productIds", ["p-2"]);
        let event = Event::new("app.order", "order").with_detail("productIds", json!(["p-1", "p-2"]));
        assert!(pattern.matches(&event));
    }

    #[test]
    fn test_exists_filter() {
        let pattern = EventPattern::from_json(&json!({
            "detail": {"errorDetail": [{"exists": false}]}
        }))
        .unwrap();

        assert!(pattern.matches(&Event::new("app.order", "order")));
        assert!(!pattern.matches(&Event::invoice_failure(crate::event::AuditReason::Timeout)));
    }

    #[test]
    fn test_scalar_pattern_value_is_rejected() {
        let err = EventPattern::from_json(&json!({"source": "app.order"})).unwrap_err();
        assert_eq!(err, PatternError::InvalidField { field: "source".to_string() });

        let err = EventPattern::from_json(&json!({"detail": {"n": [{"numeric": [">", 1]}]}})).unwrap_err();
        assert!(matches!(err, PatternError::UnsupportedFilter { .. }));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        assert!(EventPattern::new().matches(&order_error("ANY")));
        assert!(!Predicate::Any(vec![]).matches(&order_error("ANY")));
    }
}
