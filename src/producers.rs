use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::consumer::FunctionTarget;
use crate::error::DeliveryError;
use crate::event::{
    AuditReason, Event, OrderEventType, INVOICE_DETAIL_TYPE, INVOICE_SOURCE, PRODUCT_DETAIL_TYPE, PRODUCT_SOURCE,
};
use crate::queue::ChangeStream;
use crate::routing::{BusPublishReport, DeliveryOutcome, EventBus, PublishReport, Topic};
use crate::validation::{OrderKey, OrderRequest, ProductRequest};

// ============================================================================
// Producers - the services emitting domain events
// ============================================================================
//
// Producers publish and move on. Function consumers run on their own tasks;
// what happens to them shows up in a settled publish report, never as an
// error of the producing call.
//
// ============================================================================

/// Log line the order-with-non-valid-product metric filter counts
pub const PRODUCT_NOT_FOUND_LOG: &str = "Some product was not found";

pub struct OrderEventPublisher {
    topic: Arc<Topic>,
    audit_bus: Arc<EventBus>,
}

impl OrderEventPublisher {
    pub fn new(topic: Arc<Topic>, audit_bus: Arc<EventBus>) -> Self {
        Self { topic, audit_bus }
    }

    pub async fn order_created(&self, order_id: &str, request: &OrderRequest) -> PublishReport {
        let event = Event::order_lifecycle(OrderEventType::OrderCreated)
            .with_detail("orderId", order_id)
            .with_detail("email", request.email.clone())
            .with_detail("productCodes", json!(request.product_ids))
            .with_detail("payment", json!(request.payment));
        self.topic.publish(event).await
    }

    pub async fn order_deleted(&self, key: &OrderKey) -> PublishReport {
        let event = Event::order_lifecycle(OrderEventType::OrderDeleted)
            .with_detail("orderId", key.order_id.clone())
            .with_detail("email", key.email.clone());
        self.topic.publish(event).await
    }

    /// An order referenced products that do not exist: log the line the
    /// metric filter counts and publish the audit event
    pub async fn product_not_found(&self, request: &OrderRequest) -> BusPublishReport {
        tracing::warn!(
            email = %request.email,
            product_ids = ?request.product_ids,
            "{}", PRODUCT_NOT_FOUND_LOG
        );

        let event = Event::order_failure(AuditReason::ProductNotFound)
            .with_detail("email", request.email.clone())
            .with_detail("productIds", json!(request.product_ids));
        self.audit_bus.publish(event).await
    }
}

pub struct InvoiceEventPublisher {
    audit_bus: Arc<EventBus>,
    changes: Arc<ChangeStream>,
}

impl InvoiceEventPublisher {
    pub fn new(audit_bus: Arc<EventBus>, changes: Arc<ChangeStream>) -> Self {
        Self { audit_bus, changes }
    }

    /// Invoice import failed; `reason` decides which audit rule picks it up
    pub async fn import_failed(&self, transaction_id: &str, reason: AuditReason) -> BusPublishReport {
        tracing::error!(transaction_id = %transaction_id, reason = %reason, "Invoice import failed");
        let event = Event::invoice_failure(reason).with_detail("transactionId", transaction_id);
        self.audit_bus.publish(event).await
    }

    /// Record an invoice change on the change stream
    pub async fn invoice_changed(&self, invoice_id: &str, change: &str, detail: serde_json::Value) -> u64 {
        let event = Event::new(INVOICE_SOURCE, INVOICE_DETAIL_TYPE)
            .with_detail_value(detail)
            .with_detail("invoiceId", invoice_id)
            .with_detail("change", change);
        self.changes.append(event).await
    }
}

/// Product service: invokes the product events function asynchronously
pub struct ProductEventPublisher {
    function: Arc<FunctionTarget>,
}

impl ProductEventPublisher {
    pub fn new(function: Arc<FunctionTarget>) -> Self {
        Self { function }
    }

    /// The product service does not wait for the function; the handle
    /// resolves once retries and the on-failure queue are done with it
    pub fn product_changed(
        &self,
        product_id: &str,
        change: &str,
        product: &ProductRequest,
    ) -> JoinHandle<Result<DeliveryOutcome, DeliveryError>> {
        let event = Event::new(PRODUCT_SOURCE, PRODUCT_DETAIL_TYPE)
            .with_detail("productId", product_id)
            .with_detail("productCode", product.code.clone())
            .with_detail("productName", product.product_name.clone())
            .with_detail("change", change)
            .with_attribute("eventType", change);
        self.function.spawn_async(event)
    }
}
