use serde::{Deserialize, Serialize};
use std::fmt;

use super::Event;

// ============================================================================
// Event Taxonomy - the contract other services must honor
// ============================================================================

pub const ORDER_SOURCE: &str = "app.order";
pub const INVOICE_SOURCE: &str = "app.invoice";
pub const PRODUCT_SOURCE: &str = "app.product";
pub const ALARM_SOURCE: &str = "app.alarm";

pub const ORDER_DETAIL_TYPE: &str = "order";
pub const INVOICE_DETAIL_TYPE: &str = "invoice";
pub const PRODUCT_DETAIL_TYPE: &str = "product";
pub const ALARM_DETAIL_TYPE: &str = "alarm-state-change";

/// Message attribute topic subscriptions filter on
pub const EVENT_TYPE_ATTRIBUTE: &str = "eventType";

/// Order lifecycle events published to the order events topic
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventType {
    OrderCreated,
    OrderDeleted,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::OrderCreated => "ORDER_CREATED",
            OrderEventType::OrderDeleted => "ORDER_DELETED",
        }
    }
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reasons carried in audit events (`reason` / `errorDetail`)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditReason {
    ProductNotFound,
    FailNoInvoiceNumber,
    Timeout,
}

impl AuditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditReason::ProductNotFound => "PRODUCT_NOT_FOUND",
            AuditReason::FailNoInvoiceNumber => "FAIL_NO_INVOICE_NUMBER",
            AuditReason::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for AuditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition-key prefixes; they double as write-authorization boundaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPrefix {
    Transaction,
    Order,
    Product,
    Invoice,
}

impl KeyPrefix {
    /// StringLike pattern granting writes under this prefix
    pub fn pattern(&self) -> &'static str {
        match self {
            KeyPrefix::Transaction => "#transaction",
            KeyPrefix::Order => "#order_*",
            KeyPrefix::Product => "#product_*",
            KeyPrefix::Invoice => "#invoice_*",
        }
    }

    /// Concrete partition key for an entity under this prefix
    pub fn key(&self, id: &str) -> String {
        match self {
            KeyPrefix::Transaction => "#transaction".to_string(),
            KeyPrefix::Order => format!("#order_{}", id),
            KeyPrefix::Product => format!("#product_{}", id),
            KeyPrefix::Invoice => format!("#invoice_{}", id),
        }
    }
}

// ============================================================================
// Event constructors used by producers
// ============================================================================

impl Event {
    /// Order lifecycle event for the order events topic
    pub fn order_lifecycle(event_type: OrderEventType) -> Self {
        Event::new(ORDER_SOURCE, ORDER_DETAIL_TYPE)
            .with_attribute(EVENT_TYPE_ATTRIBUTE, event_type.as_str())
            .with_detail(EVENT_TYPE_ATTRIBUTE, event_type.as_str())
    }

    /// Order audit event, e.g. an order referencing an unknown product
    pub fn order_failure(reason: AuditReason) -> Self {
        Event::new(ORDER_SOURCE, ORDER_DETAIL_TYPE).with_detail("reason", reason.as_str())
    }

    /// Invoice audit event, e.g. an import that timed out
    pub fn invoice_failure(error_detail: AuditReason) -> Self {
        Event::new(INVOICE_SOURCE, INVOICE_DETAIL_TYPE)
            .with_detail("errorDetail", error_detail.as_str())
    }

    pub fn order_event_type(&self) -> Option<OrderEventType> {
        match self.attribute(EVENT_TYPE_ATTRIBUTE)? {
            "ORDER_CREATED" => Some(OrderEventType::OrderCreated),
            "ORDER_DELETED" => Some(OrderEventType::OrderDeleted),
            _ => None,
        }
    }
}
