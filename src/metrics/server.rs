use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::topology::OrderTopology;

/// Start the metrics HTTP server: Prometheus text on `/metrics`, alarm and
/// dead-letter summary on `/health`
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    topology: Arc<OrderTopology>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(topology.clone()))
            .configure(routes)
    })
    .workers(1)
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

/// Degraded topologies still answer 200; the body tells which alarm fired
/// or which dead-letter queue filled up
async fn health_handler(topology: web::Data<Arc<OrderTopology>>) -> impl Responder {
    let health = topology.health().await;
    if !health.is_healthy() {
        tracing::debug!(alarms = ?health.alarms, dead_letter_queues = ?health.dead_letter_queues, "Health degraded");
    }

    HttpResponse::Ok().json(serde_json::json!({
        "service": "orderflow",
        "status": health.status,
        "alarms": health.alarms,
        "deadLetterQueues": health.dead_letter_queues,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::EventLedger;
    use crate::config::AppConfig;
    use crate::event::Event;
    use crate::metrics::Metrics;
    use crate::topology::{product_not_found_filter, TopologyConsumers};
    use crate::utils::FakeClock;
    use actix_web::test;

    async fn topology(metrics: Arc<Metrics>) -> Arc<OrderTopology> {
        let clock = FakeClock::new();
        let ledger = Arc::new(EventLedger::new());
        let consumers = TopologyConsumers::standard(&ledger, "ops@example.com");
        let filter = product_not_found_filter(clock.shared());

        Arc::new(
            OrderTopology::build(&AppConfig::default(), consumers, ledger, filter.series(), clock.shared(), metrics)
                .await
                .unwrap(),
        )
    }

    #[actix_web::test]
    async fn test_health_reports_dead_letters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let topology = topology(metrics.clone()).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Arc::new(metrics.registry().clone())))
                .app_data(web::Data::new(topology.clone()))
                .configure(routes),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["alarms"]["OrderWithNonValidProduct"], "OK");

        topology.invoice_events_dlq.send(Event::new("app.invoice", "invoice")).await;
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["deadLetterQueues"]["invoice-events-dlq"], 1);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_exposes_queue_gauges() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let topology = topology(metrics.clone()).await;
        topology.order_events_queue.send(Event::new("app.order", "order")).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Arc::new(metrics.registry().clone())))
                .app_data(web::Data::new(topology))
                .configure(routes),
        )
        .await;

        let response = test::call_and_read_body(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        let text = String::from_utf8(response.to_vec()).unwrap();
        assert!(text.contains("order-events"));
    }
}
