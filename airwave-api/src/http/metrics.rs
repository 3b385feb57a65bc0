//! Prometheus metrics for the Control API: HTTP request counters/latencies
//! by route, plus the queue-depth/slot-occupancy/webhook-delivery gauges
//! named in the operational surface. Gated behind `server.metrics_enabled`
//! so a deployment that doesn't scrape Prometheus pays nothing for it.

use std::time::Instant;

use axum::extract::{MatchedPath, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use super::AppState;

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Total HTTP requests, labeled by method, route, and status code.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("airwave_http_requests_total", "Total number of HTTP requests"),
        &["method", "route", "status"],
    )
    .expect("failed to create airwave_http_requests_total")
});

/// HTTP request duration in seconds, labeled by method and route.
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("airwave_http_request_duration_seconds", "HTTP request duration in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "route"],
    )
    .expect("failed to create airwave_http_request_duration_seconds")
});

/// Current length of each queue, labeled by `queue` (`user` | `fallback`).
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("airwave_queue_depth", "Current number of songs queued"), &["queue"])
        .expect("failed to create airwave_queue_depth")
});

/// 1 if the livestream slot is currently occupied, else 0.
pub static LIVESTREAM_SLOT_OCCUPIED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("airwave_livestream_slot_occupied", "Whether the livestream slot is occupied")
        .expect("failed to create airwave_livestream_slot_occupied")
});

/// Webhook deliveries recorded in the last 100 entries per subscription,
/// summed across all subscriptions and labeled by outcome. Recomputed on
/// every scrape from the Catalog Store's delivery log rather than pushed
/// live from the dispatcher, since the dispatcher (in `airwave-control`)
/// has no dependency on this crate's metrics registry.
pub static WEBHOOK_DELIVERIES_TOTAL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("airwave_webhook_deliveries_total", "Recent webhook delivery attempts by outcome"),
        &["outcome"],
    )
    .expect("failed to create airwave_webhook_deliveries_total")
});

fn register_metrics(registry: &Registry) {
    registry.register(Box::new(HTTP_REQUESTS_TOTAL.clone())).expect("failed to register airwave_http_requests_total");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("failed to register airwave_http_request_duration_seconds");
    registry.register(Box::new(QUEUE_DEPTH.clone())).expect("failed to register airwave_queue_depth");
    registry
        .register(Box::new(LIVESTREAM_SLOT_OCCUPIED.clone()))
        .expect("failed to register airwave_livestream_slot_occupied");
    registry
        .register(Box::new(WEBHOOK_DELIVERIES_TOTAL.clone()))
        .expect("failed to register airwave_webhook_deliveries_total");
}

/// Middleware recording request count and latency for every route; the
/// route template (not the raw path) is used as a label to avoid
/// high-cardinality series on song/recording/webhook IDs.
pub async fn track_http_metrics(
    matched_path: Option<MatchedPath>,
    request: axum::extract::Request,
    next: Next,
) -> impl IntoResponse {
    let method = request.method().to_string();
    let route = matched_path.map(|p| p.as_str().to_owned()).unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL.with_label_values(&[&method, &route, &status]).inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &route])
        .observe(started.elapsed().as_secs_f64());

    response
}

/// `GET /api/metrics` — Prometheus text exposition format. Only mounted
/// when `server.metrics_enabled` is set.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if let Ok(slot) = state.arbiter.slot().await {
        LIVESTREAM_SLOT_OCCUPIED.set(i64::from(slot.occupied));
    }
    if let Ok(user_songs) = state.queue.list(airwave_core::models::QueueKind::User, None).await {
        QUEUE_DEPTH.with_label_values(&["user"]).set(user_songs.len() as i64);
    }
    if let Ok(fallback_songs) = state.queue.list(airwave_core::models::QueueKind::Fallback, None).await {
        QUEUE_DEPTH.with_label_values(&["fallback"]).set(fallback_songs.len() as i64);
    }

    if let Ok(webhooks) = state.catalog.webhooks.list_all().await {
        let (mut succeeded, mut failed) = (0i64, 0i64);
        for webhook in webhooks {
            if let Ok(deliveries) = state.catalog.webhooks.deliveries_for(&webhook.webhook_id, 100).await {
                for delivery in deliveries {
                    match delivery.status {
                        airwave_core::models::DeliveryStatus::Success => succeeded += 1,
                        airwave_core::models::DeliveryStatus::Failed => failed += 1,
                    }
                }
            }
        }
        WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["success"]).set(succeeded);
        WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["failed"]).set(failed);
    }

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics".to_owned()).into_response();
    }
    let body = String::from_utf8(buffer).unwrap_or_default();
    (StatusCode::OK, body).into_response()
}
