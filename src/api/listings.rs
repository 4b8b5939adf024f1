//! Public listing catalogue and host-facing listing management.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, resource_types, BookingWithDetails, CreateListingRequest, Listing, ListingQuery,
    ListingWithHost, UpdateListingRequest, User,
};
use crate::AppState;

use super::audit::{audit_log, extract_client_ip};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_address, validate_description, validate_max_guests, validate_price,
    validate_property_type, validate_title, validate_uuid,
};

/// Validate a CreateListingRequest
fn validate_create_request(req: &CreateListingRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_title(&req.title) {
        errors.add("title", &e);
    }

    if let Err(e) = validate_description(&req.description) {
        errors.add("description", &e);
    }

    if let Err(e) = validate_price(req.price_per_night) {
        errors.add("price_per_night", &e);
    }

    if let Err(e) = validate_property_type(&req.property_type) {
        errors.add("property_type", &e);
    }

    if let Err(e) = validate_address(&req.address) {
        errors.add("address", &e);
    }

    if let Some(max_guests) = req.max_guests {
        if let Err(e) = validate_max_guests(max_guests) {
            errors.add("max_guests", &e);
        }
    }

    errors.finish()
}

/// Validate an UpdateListingRequest (only validates provided fields)
fn validate_update_request(req: &UpdateListingRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(ref title) = req.title {
        if let Err(e) = validate_title(title) {
            errors.add("title", &e);
        }
    }

    if let Some(ref description) = req.description {
        if let Err(e) = validate_description(description) {
            errors.add("description", &e);
        }
    }

    if let Some(price) = req.price_per_night {
        if let Err(e) = validate_price(price) {
            errors.add("price_per_night", &e);
        }
    }

    if let Some(ref property_type) = req.property_type {
        if let Err(e) = validate_property_type(property_type) {
            errors.add("property_type", &e);
        }
    }

    if let Some(ref address) = req.address {
        if let Err(e) = validate_address(address) {
            errors.add("address", &e);
        }
    }

    if let Some(max_guests) = req.max_guests {
        if let Err(e) = validate_max_guests(max_guests) {
            errors.add("max_guests", &e);
        }
    }

    errors.finish()
}

/// Browse the public catalogue with optional filters.
///
/// Query parameters:
/// - property_type: Exact match on the property type
/// - min_price / max_price: Nightly rate range
/// - guests: Only listings that sleep at least this many guests
pub async fn list_listings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<Vec<Listing>>, ApiError> {
    // Each filter is bound twice: once for the NULL probe, once for the
    // comparison itself.
    let listings = sqlx::query_as::<_, Listing>(
        r#"
        SELECT * FROM listings
        WHERE (? IS NULL OR property_type = ?)
          AND (? IS NULL OR price_per_night >= ?)
          AND (? IS NULL OR price_per_night <= ?)
          AND (? IS NULL OR max_guests >= ?)
        ORDER BY created_at ASC
        "#,
    )
    .bind(&query.property_type)
    .bind(&query.property_type)
    .bind(query.min_price)
    .bind(query.min_price)
    .bind(query.max_price)
    .bind(query.max_price)
    .bind(query.guests)
    .bind(query.guests)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(listings))
}

/// A single listing with its host attached, for the detail page.
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ListingWithHost>, ApiError> {
    // Validate ID format
    if let Err(e) = validate_uuid(&id, "listing_id") {
        return Err(ApiError::validation_field("listing_id", e));
    }

    let listing = sqlx::query_as::<_, ListingWithHost>(
        r#"
        SELECT l.id, l.host_id, l.title, l.description, l.price_per_night,
               l.property_type, l.address, l.max_guests, l.created_at, l.updated_at,
               u.name AS host_name, u.email AS host_email
        FROM listings l
        JOIN users u ON u.id = l.host_id
        WHERE l.id = ?
        "#,
    )
    .bind(&id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Listing not found"))?;

    Ok(Json(listing))
}

pub async fn create_listing(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateListingRequest>,
) -> Result<(StatusCode, Json<Listing>), ApiError> {
    // Validate request
    validate_create_request(&req)?;

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let max_guests = req.max_guests.unwrap_or(2);

    sqlx::query(
        r#"
        INSERT INTO listings (id, host_id, title, description, price_per_night, property_type, address, max_guests, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.price_per_night)
    .bind(&req.property_type)
    .bind(&req.address)
    .bind(max_guests)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::LISTING_CREATE,
        resource_types::LISTING,
        Some(&listing.id),
        Some(&listing.title),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(listing_id = %listing.id, host_id = %user.id, "Listing created");

    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn update_listing(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateListingRequest>,
) -> Result<Json<Listing>, ApiError> {
    // Validate ID format
    if let Err(e) = validate_uuid(&id, "listing_id") {
        return Err(ApiError::validation_field("listing_id", e));
    }

    // Validate request
    validate_update_request(&req)?;

    let existing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Listing not found"))?;

    if existing.host_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("You do not own this listing"));
    }

    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE listings
        SET title = ?, description = ?, price_per_night = ?, property_type = ?, address = ?, max_guests = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.title.clone().unwrap_or(existing.title.clone()))
    .bind(req.description.clone().unwrap_or(existing.description.clone()))
    .bind(req.price_per_night.unwrap_or(existing.price_per_night))
    .bind(req.property_type.clone().unwrap_or(existing.property_type.clone()))
    .bind(req.address.clone().unwrap_or(existing.address.clone()))
    .bind(req.max_guests.unwrap_or(existing.max_guests))
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::LISTING_UPDATE,
        resource_types::LISTING,
        Some(&listing.id),
        Some(&listing.title),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(listing_id = %listing.id, "Listing updated");

    Ok(Json(listing))
}

pub async fn delete_listing(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    // Validate ID format
    if let Err(e) = validate_uuid(&id, "listing_id") {
        return Err(ApiError::validation_field("listing_id", e));
    }

    let existing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Listing not found"))?;

    if existing.host_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("You do not own this listing"));
    }

    // Bookings keep a foreign key to the listing, so refuse to delete
    // while any non-cancelled booking still references it.
    let (active_bookings,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings WHERE listing_id = ? AND status != 'cancelled'",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    if active_bookings > 0 {
        return Err(ApiError::conflict(
            "Listing has active bookings and cannot be deleted",
        ));
    }

    sqlx::query("DELETE FROM bookings WHERE listing_id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    sqlx::query("DELETE FROM listings WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::LISTING_DELETE,
        resource_types::LISTING,
        Some(&existing.id),
        Some(&existing.title),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(listing_id = %existing.id, "Listing deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Listings owned by the current caller.
pub async fn my_listings(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Listing>>, ApiError> {
    let listings = sqlx::query_as::<_, Listing>(
        "SELECT * FROM listings WHERE host_id = ? ORDER BY created_at ASC",
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(listings))
}

/// Reservations made against one of the caller's listings, with guest
/// contact details so the host can follow up.
pub async fn listing_bookings(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Vec<BookingWithDetails>>, ApiError> {
    if let Err(e) = validate_uuid(&id, "listing_id") {
        return Err(ApiError::validation_field("listing_id", e));
    }

    let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Listing not found"))?;

    if listing.host_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("You do not own this listing"));
    }

    let bookings = sqlx::query_as::<_, BookingWithDetails>(
        r#"
        SELECT b.*, l.title AS listing_title, l.address AS listing_address,
               u.name AS guest_name, u.email AS guest_email
        FROM bookings b
        JOIN listings l ON l.id = b.listing_id
        JOIN users u ON u.id = b.user_id
        WHERE b.listing_id = ?
        ORDER BY b.created_at ASC
        "#,
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bookings))
}
