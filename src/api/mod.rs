//! HTTP API surface.

mod admin;
mod audit;
pub mod auth;
mod bookings;
pub mod error;
mod listings;
pub mod metrics;
pub mod rate_limit;
mod validation;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth endpoints share the stricter per-IP budget
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Moderation surface; every handler authorizes through AdminUser
    let admin_routes = Router::new()
        .route("/bookings", get(admin::list_bookings))
        .route("/bookings/:id", patch(admin::update_booking))
        .route("/listings", get(admin::list_listings))
        .route("/users", get(admin::list_users))
        .route("/users/:id/promote", post(admin::promote_user))
        .route("/reports/:id", delete(admin::delete_report))
        .route("/audit-logs", get(audit::list_logs));

    // Catalogue reads are public; the rest authorize through the User
    // extractor inside each handler
    let api_routes = Router::new()
        .route("/session", get(auth::session))
        .route("/listings", get(listings::list_listings))
        .route("/listings", post(listings::create_listing))
        .route("/listings/:id", get(listings::get_listing))
        .route("/listings/:id", put(listings::update_listing))
        .route("/listings/:id", delete(listings::delete_listing))
        .route("/my-listings", get(listings::my_listings))
        .route("/my-listings/:id/bookings", get(listings::listing_bookings))
        .route("/bookings", get(bookings::my_bookings))
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/auth", auth_routes)
        .merge(api_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
