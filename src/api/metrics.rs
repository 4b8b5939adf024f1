//! Prometheus instrumentation.
//!
//! Request counts and latencies are recorded by middleware, booking
//! lifecycle events by explicit recorders in the handlers, and a handful
//! of gauges are refreshed from the database each time `/metrics` is
//! scraped.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const BOOKINGS_TOTAL: &str = "bookings_total";
pub const LISTINGS_TOTAL: &str = "listings_total";
pub const USERS_TOTAL: &str = "users_total";
pub const SESSIONS_ACTIVE: &str = "sessions_active";

/// Install the global Prometheus recorder. Called once at startup, before
/// any handler runs.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        BOOKINGS_TOTAL,
        "Total number of booking events by outcome (created/confirmed/cancelled)"
    );
    describe_gauge!(LISTINGS_TOTAL, "Total number of published listings");
    describe_gauge!(USERS_TOTAL, "Total number of registered users");
    describe_gauge!(SESSIONS_ACTIVE, "Number of unexpired login sessions");

    handle
}

/// GET /metrics, unauthenticated Prometheus text exposition
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;

    match state.metrics_handle.as_ref() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Point-in-time gauges are cheap enough to recount on every scrape.
async fn refresh_gauges(state: &AppState) {
    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings")
        .fetch_one(&state.db)
        .await
    {
        gauge!(LISTINGS_TOTAL).set(count as f64);
    }

    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db)
        .await
    {
        gauge!(USERS_TOTAL).set(count as f64);
    }

    let now = chrono::Utc::now().to_rfc3339();
    if let Ok(count) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions WHERE expires_at > ?")
            .bind(&now)
            .fetch_one(&state.db)
            .await
    {
        gauge!(SESSIONS_ACTIVE).set(count as f64);
    }
}

/// Count every request and time it, labelled by method, route and status.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Label by route pattern ("/listings/:id") rather than raw path to
    // keep cardinality bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Record a newly created booking.
pub fn record_booking_created() {
    counter!(BOOKINGS_TOTAL, "outcome" => "created").increment(1);
}

/// Record a confirmed booking.
pub fn record_booking_confirmed() {
    counter!(BOOKINGS_TOTAL, "outcome" => "confirmed").increment(1);
}

/// Record a cancelled booking.
pub fn record_booking_cancelled() {
    counter!(BOOKINGS_TOTAL, "outcome" => "cancelled").increment(1);
}
