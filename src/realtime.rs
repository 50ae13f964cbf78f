use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::access::{EventLedger, ScopedWriter};
use crate::error::{ConsumerError, RealtimeError};
use crate::event::{Event, KeyPrefix, INVOICE_SOURCE};

// ============================================================================
// Realtime Route Table - connection-oriented channel routing
// ============================================================================
//
// A connection exists between a successful `$connect` and its `$disconnect`.
// Frames are JSON objects routed by their `action` field, with `$default`
// catching unknown actions. Both lifecycle routes must be wired before the
// table can be built.
//
// ============================================================================

pub const CONNECT_ROUTE: &str = "$connect";
pub const DISCONNECT_ROUTE: &str = "$disconnect";
pub const DEFAULT_ROUTE: &str = "$default";

#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle one frame; the returned value, if any, is sent back on the
    /// same connection
    async fn handle(&self, connection_id: &str, body: &Value) -> Result<Option<Value>, ConsumerError>;
}

#[derive(Default)]
pub struct RealtimeApiBuilder {
    name: String,
    connect: Option<Arc<dyn RouteHandler>>,
    disconnect: Option<Arc<dyn RouteHandler>>,
    default: Option<Arc<dyn RouteHandler>>,
    routes: HashMap<String, Arc<dyn RouteHandler>>,
}

impl RealtimeApiBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn on_connect(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.connect = Some(handler);
        self
    }

    pub fn on_disconnect(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.disconnect = Some(handler);
        self
    }

    pub fn default_route(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.default = Some(handler);
        self
    }

    pub fn route(mut self, action: impl Into<String>, handler: Arc<dyn RouteHandler>) -> Self {
        self.routes.insert(action.into(), handler);
        self
    }

    pub fn build(self) -> Result<RealtimeApi, RealtimeError> {
        let connect = self.connect.ok_or(RealtimeError::MissingLifecycleHandler(CONNECT_ROUTE))?;
        let disconnect = self
            .disconnect
            .ok_or(RealtimeError::MissingLifecycleHandler(DISCONNECT_ROUTE))?;

        Ok(RealtimeApi {
            name: self.name,
            connect,
            disconnect,
            default: self.default,
            routes: self.routes,
            connections: RwLock::new(HashSet::new()),
        })
    }
}

pub struct RealtimeApi {
    name: String,
    connect: Arc<dyn RouteHandler>,
    disconnect: Arc<dyn RouteHandler>,
    default: Option<Arc<dyn RouteHandler>>,
    routes: HashMap<String, Arc<dyn RouteHandler>>,
    connections: RwLock<HashSet<String>>,
}

impl RealtimeApi {
    pub fn builder(name: impl Into<String>) -> RealtimeApiBuilder {
        RealtimeApiBuilder::new(name)
    }

    /// Open a connection; it is registered only if the connect handler
    /// accepts it
    pub async fn connect(&self) -> Result<String, RealtimeError> {
        let connection_id = Uuid::new_v4().to_string();
        self.connect
            .handle(&connection_id, &Value::Null)
            .await
            .map_err(|source| RealtimeError::Handler {
                route: CONNECT_ROUTE.to_string(),
                source,
            })?;

        self.connections.write().await.insert(connection_id.clone());
        tracing::info!(api = %self.name, connection_id = %connection_id, "🔌 Connection opened");
        Ok(connection_id)
    }

    pub async fn disconnect(&self, connection_id: &str) -> Result<(), RealtimeError> {
        if !self.connections.write().await.remove(connection_id) {
            return Err(RealtimeError::NotConnected(connection_id.to_string()));
        }
        tracing::info!(api = %self.name, connection_id = %connection_id, "Connection closed");

        self.disconnect
            .handle(connection_id, &Value::Null)
            .await
            .map(|_| ())
            .map_err(|source| RealtimeError::Handler {
                route: DISCONNECT_ROUTE.to_string(),
                source,
            })
    }

    pub async fn is_connected(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains(connection_id)
    }

    pub async fn dispatch(&self, connection_id: &str, frame: &str) -> Result<Option<Value>, RealtimeError> {
        if !self.is_connected(connection_id).await {
            return Err(RealtimeError::NotConnected(connection_id.to_string()));
        }

        let body: Value = serde_json::from_str(frame).map_err(|e| RealtimeError::MalformedFrame(e.to_string()))?;
        let action = body
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ROUTE)
            .to_string();

        let (route, handler) = match self.routes.get(&action) {
            Some(handler) => (action, handler),
            None => match &self.default {
                Some(handler) => (DEFAULT_ROUTE.to_string(), handler),
                None => return Err(RealtimeError::NoRoute(action)),
            },
        };

        tracing::debug!(api = %self.name, connection_id = %connection_id, route = %route, "Dispatching frame");
        handler
            .handle(connection_id, &body)
            .await
            .map_err(|source| RealtimeError::Handler { route, source })
    }
}

// ============================================================================
// Invoice import routes
// ============================================================================

/// Accepts every connection and logs lifecycle events
pub struct LifecycleLogger;

#[async_trait]
impl RouteHandler for LifecycleLogger {
    async fn handle(&self, connection_id: &str, _body: &Value) -> Result<Option<Value>, ConsumerError> {
        tracing::debug!(connection_id = %connection_id, "Lifecycle route invoked");
        Ok(None)
    }
}

/// Hands out a pre-signed style upload URL and opens an import transaction
pub struct ImportUrlHandler {
    writer: ScopedWriter,
    upload_base_url: String,
}

impl ImportUrlHandler {
    pub fn new(writer: ScopedWriter, upload_base_url: impl Into<String>) -> Self {
        Self {
            writer,
            upload_base_url: upload_base_url.into(),
        }
    }
}

#[async_trait]
impl RouteHandler for ImportUrlHandler {
    async fn handle(&self, connection_id: &str, _body: &Value) -> Result<Option<Value>, ConsumerError> {
        let transaction_id = Uuid::new_v4().to_string();
        let transaction = Event::new(INVOICE_SOURCE, "invoice-transaction")
            .with_detail("transactionId", transaction_id.clone())
            .with_detail("connectionId", connection_id)
            .with_detail("status", "URL_GENERATED");

        self.writer
            .write(&KeyPrefix::Transaction.key(&transaction_id), transaction)
            .await
            .map_err(|e| ConsumerError::rejected(e.to_string()))?;

        tracing::info!(connection_id = %connection_id, transaction_id = %transaction_id, "Import URL generated");
        Ok(Some(json!({
            "url": format!("{}/{}", self.upload_base_url.trim_end_matches('/'), transaction_id),
            "expires": 300,
            "transactionId": transaction_id,
        })))
    }
}

/// Cancels an import transaction that has not started processing
pub struct CancelImportHandler {
    ledger: Arc<EventLedger>,
    writer: ScopedWriter,
}

impl CancelImportHandler {
    pub fn new(ledger: Arc<EventLedger>, writer: ScopedWriter) -> Self {
        Self { ledger, writer }
    }
}

#[async_trait]
impl RouteHandler for CancelImportHandler {
    async fn handle(&self, connection_id: &str, body: &Value) -> Result<Option<Value>, ConsumerError> {
        let transaction_id = body
            .get("transactionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ConsumerError::rejected("missing transactionId"))?;
        let key = KeyPrefix::Transaction.key(transaction_id);

        let status = self
            .ledger
            .history(&key)
            .await
            .iter()
            .rev()
            .find(|e| e.detail_str("transactionId") == Some(transaction_id))
            .and_then(|e| e.detail_str("status").map(str::to_string));

        match status.as_deref() {
            Some("URL_GENERATED") => {
                let cancelled = Event::new(INVOICE_SOURCE, "invoice-transaction")
                    .with_detail("transactionId", transaction_id)
                    .with_detail("connectionId", connection_id)
                    .with_detail("status", "CANCELLED");
                self.writer
                    .write(&key, cancelled)
                    .await
                    .map_err(|e| ConsumerError::rejected(e.to_string()))?;
                Ok(Some(json!({"transactionId": transaction_id, "status": "CANCELLED"})))
            }
            Some(other) => Ok(Some(json!({
                "transactionId": transaction_id,
                "status": other,
                "message": "import can no longer be cancelled",
            }))),
            None => Err(ConsumerError::rejected(format!("transaction {} not found", transaction_id))),
        }
    }
}
