use actix::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod access;
mod actors;
mod config;
mod consumer;
mod error;
mod event;
mod metrics;
mod monitoring;
mod producers;
mod queue;
mod realtime;
mod routing;
mod topology;
mod utils;
mod validation;

use crate::access::EventLedger;
use crate::actors::{Shutdown, TopologyCoordinator};
use crate::config::AppConfig;
use crate::event::AuditReason;
use crate::monitoring::LogMetricLayer;
use crate::topology::{product_not_found_filter, OrderTopology, TopologyConsumers};
use crate::utils::SystemClock;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let clock = SystemClock::shared();

    // Log metric filters must be in place before any producer logs
    let product_not_found = product_not_found_filter(clock.clone());
    let product_not_found_series = product_not_found.series();

    // Initialize structured logging with environment-based filtering
    // RUST_LOG overrides the configured filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .with(LogMetricLayer::new(vec![product_not_found]))
        .init();

    tracing::info!("🚀 Starting orderflow event topology");

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Wire the topology ===
    let ledger = Arc::new(EventLedger::new());
    let consumers = TopologyConsumers::standard(&ledger, &config.alarms.notification_email);
    let topology = Arc::new(
        OrderTopology::build(
            &config,
            consumers,
            ledger,
            product_not_found_series,
            clock,
            metrics.clone(),
        )
        .await?,
    );

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    let health_topology = topology.clone();
    actix::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_registry, health_topology, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 3. Start the coordinator ===
    tracing::info!("Starting topology coordinator");
    let coordinator = TopologyCoordinator::new(topology.clone(), &config).start();

    // === 4. Demonstrate the event flows ===
    tracing::info!("📝 Demonstrating order, invoice and product flows");

    let order = validation::validate_order_body(
        r#"{"email":"customer@orderflow.local","productIds":["p-1","p-2"],"payment":"CREDIT_CARD"}"#,
    )?;
    let order_id = uuid::Uuid::new_v4().to_string();
    let report = topology.orders.order_created(&order_id, &order).await;
    tracing::info!(order_id = %order_id, delivered_to = ?report.delivered_to(), "✅ Order created");

    topology.orders.product_not_found(&order).await;

    let product = validation::validate_product_body(r#"{"productName":"Keyboard","code":"KB-01","price":49.9}"#)?;
    topology.products.product_changed("p-1", "PRODUCT_CREATED", &product);

    let connection = topology.invoice_ws.connect().await?;
    if let Some(reply) = topology
        .invoice_ws
        .dispatch(&connection, &json!({ "action": "getImportUrl" }).to_string())
        .await?
    {
        tracing::info!(reply = %reply, "✅ Invoice import URL issued");
    }
    topology.invoice_ws.disconnect(&connection).await?;

    topology
        .invoices
        .invoice_changed("inv-1", "INSERT", json!({ "invoiceNumber": "INV-1", "totalValue": 120.5 }))
        .await;
    topology.invoices.import_failed("tx-demo", AuditReason::Timeout).await;

    // Keep running until interrupted
    tracing::info!("⏳ Topology running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    coordinator
        .send(Shutdown)
        .await?
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!("🎉 Shutdown complete");

    Ok(())
}
