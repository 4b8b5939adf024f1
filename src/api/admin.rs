//! Moderation endpoints. Every handler takes AdminUser, so the role
//! check runs before any store access and failures have no side effects.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, resource_types, BookingAction, BookingActionRequest, BookingActionResponse,
    BookingWithDetails, ListingWithHost, User, UserResponse,
};
use crate::AppState;

use super::audit::{audit_log, extract_client_ip};
use super::auth::AdminUser;
use super::bookings::apply_transition;
use super::error::ApiError;
use super::metrics::{record_booking_cancelled, record_booking_confirmed};
use super::validation::validate_uuid;

#[derive(serde::Serialize)]
pub struct DeleteReportResponse {
    pub message: String,
    pub report_id: String,
}

/// All bookings with listing and guest details attached.
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<BookingWithDetails>>, ApiError> {
    let bookings = sqlx::query_as::<_, BookingWithDetails>(
        r#"
        SELECT b.id, b.listing_id, b.user_id, b.check_in, b.check_out, b.guests,
               b.total_price, b.status, b.created_at, b.updated_at,
               l.title AS listing_title, l.address AS listing_address,
               u.name AS guest_name, u.email AS guest_email
        FROM bookings b
        JOIN listings l ON l.id = b.listing_id
        JOIN users u ON u.id = b.user_id
        ORDER BY b.created_at ASC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bookings))
}

/// Confirm or cancel a booking.
pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<BookingActionRequest>,
) -> Result<Json<BookingActionResponse>, ApiError> {
    // Reject unknown actions before touching the database
    let action: BookingAction = req
        .action
        .parse()
        .map_err(|e: String| ApiError::validation_field("action", e))?;

    if let Err(e) = validate_uuid(&id, "booking_id") {
        return Err(ApiError::validation_field("booking_id", e));
    }

    let booking = apply_transition(&state.db, &id, action).await?;

    match action {
        BookingAction::Confirm => record_booking_confirmed(),
        BookingAction::Cancel => record_booking_cancelled(),
    }

    let audit_action = match action {
        BookingAction::Confirm => actions::BOOKING_CONFIRM,
        BookingAction::Cancel => actions::BOOKING_CANCEL,
    };

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        audit_action,
        resource_types::BOOKING,
        Some(&booking.id),
        None,
        Some(&admin.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(
        booking_id = %booking.id,
        action = %req.action,
        admin_id = %admin.id,
        "Booking moderated"
    );

    Ok(Json(BookingActionResponse {
        message: format!("Booking {} successfully", action.past_tense()),
        booking,
    }))
}

/// All listings with their host attached.
pub async fn list_listings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<ListingWithHost>>, ApiError> {
    let listings = sqlx::query_as::<_, ListingWithHost>(
        r#"
        SELECT l.id, l.host_id, l.title, l.description, l.price_per_night,
               l.property_type, l.address, l.max_guests, l.created_at, l.updated_at,
               u.name AS host_name, u.email AS host_email
        FROM listings l
        JOIN users u ON u.id = l.host_id
        ORDER BY l.created_at ASC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(listings))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at ASC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Grant the admin role. The update is unconditional, so promoting a
/// missing or already-admin user succeeds quietly.
pub async fn promote_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Validate ID format
    if let Err(e) = validate_uuid(&id, "user_id") {
        return Err(ApiError::validation_field("user_id", e));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query("UPDATE users SET role = 'admin', updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&id)
        .execute(&state.db)
        .await?;

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::USER_PROMOTE,
        resource_types::USER,
        Some(&id),
        None,
        Some(&admin.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(
        user_id = %id,
        admin_id = %admin.id,
        rows = result.rows_affected(),
        "User promoted to admin"
    );

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Acknowledge a report deletion. Reports are raised and resolved in an
/// external moderation tool, so no table backs them here.
pub async fn delete_report(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteReportResponse>, ApiError> {
    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::REPORT_DELETE,
        resource_types::REPORT,
        Some(&id),
        None,
        Some(&admin.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(report_id = %id, admin_id = %admin.id, "Report deletion acknowledged");

    Ok(Json(DeleteReportResponse {
        message: "Report deleted successfully".to_string(),
        report_id: id,
    }))
}
