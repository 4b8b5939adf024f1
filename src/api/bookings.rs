//! Guest booking endpoints and the booking status transition logic.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, resource_types, Booking, BookingAction, BookingActionResponse, BookingWithDetails,
    CreateBookingRequest, DbPool, Listing, TransitionError, User,
};
use crate::AppState;

use super::audit::{audit_log, extract_client_ip};
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics::{record_booking_cancelled, record_booking_created};
use super::validation::{
    validate_date, validate_date_range, validate_guests, validate_not_past, validate_uuid,
};

/// Validate a CreateBookingRequest (capacity is checked later against the listing)
fn validate_create_request(req: &CreateBookingRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_uuid(&req.listing_id, "listing_id") {
        errors.add("listing_id", &e);
    }

    let mut dates_ok = true;
    if let Err(e) = validate_date(&req.check_in, "check_in") {
        errors.add("check_in", &e);
        dates_ok = false;
    }

    if let Err(e) = validate_date(&req.check_out, "check_out") {
        errors.add("check_out", &e);
        dates_ok = false;
    }

    if dates_ok {
        if let Err(e) = validate_not_past(&req.check_in, "check_in") {
            errors.add("check_in", &e);
        }

        if let Err(e) = validate_date_range(&req.check_in, &req.check_out) {
            errors.add("check_out", &e);
        }
    }

    errors.finish()
}

/// Apply a status transition with a guarded update.
///
/// The pending status is re-checked in the WHERE clause, so two
/// concurrent actions on the same booking cannot both win. The loser
/// gets an AlreadyResolved error naming the state that stuck.
pub async fn apply_transition(
    db: &DbPool,
    booking_id: &str,
    action: BookingAction,
) -> Result<Booking, ApiError> {
    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(booking_id)
        .fetch_optional(db)
        .await?
        .ok_or(TransitionError::NotFound)?;

    let current = booking.status_enum();
    let target = action.target_status();
    if !current.can_become(target) {
        return Err(TransitionError::AlreadyResolved(current).into());
    }

    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        "UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(target.to_string())
    .bind(&now)
    .bind(booking_id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        // Lost a race with another transition; report the state that stuck.
        let winner = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
            .bind(booking_id)
            .fetch_optional(db)
            .await?;
        return Err(match winner {
            Some(b) => TransitionError::AlreadyResolved(b.status_enum()).into(),
            None => TransitionError::NotFound.into(),
        });
    }

    let updated = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(booking_id)
        .fetch_one(db)
        .await?;

    Ok(updated)
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    // Validate request
    validate_create_request(&req)?;

    let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
        .bind(&req.listing_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Listing not found"))?;

    if listing.host_id == user.id {
        return Err(ApiError::bad_request("You cannot book your own listing"));
    }

    if let Err(e) = validate_guests(req.guests, listing.max_guests) {
        return Err(ApiError::validation_field("guests", e));
    }

    // Dates were validated above, so these parses only fail on a stale request
    let check_in = NaiveDate::parse_from_str(&req.check_in, "%Y-%m-%d")
        .map_err(|_| ApiError::validation_field("check_in", "Invalid date".to_string()))?;
    let check_out = NaiveDate::parse_from_str(&req.check_out, "%Y-%m-%d")
        .map_err(|_| ApiError::validation_field("check_out", "Invalid date".to_string()))?;
    let nights = (check_out - check_in).num_days();
    let total_price = nights as f64 * listing.price_per_night;

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    // The availability check and the insert run in one transaction so two
    // overlapping requests cannot both pass the check.
    let mut tx = state.db.begin().await?;

    let (conflicts,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM bookings
        WHERE listing_id = ? AND status != 'cancelled'
          AND check_in < ? AND check_out > ?
        "#,
    )
    .bind(&req.listing_id)
    .bind(&req.check_out)
    .bind(&req.check_in)
    .fetch_one(&mut *tx)
    .await?;

    if conflicts > 0 {
        return Err(ApiError::conflict(
            "Listing is already booked for those dates",
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO bookings (id, listing_id, user_id, check_in, check_out, guests, total_price, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&req.listing_id)
    .bind(&user.id)
    .bind(&req.check_in)
    .bind(&req.check_out)
    .bind(req.guests)
    .bind(total_price)
    .bind("pending")
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    record_booking_created();

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::BOOKING_CREATE,
        resource_types::BOOKING,
        Some(&booking.id),
        Some(&listing.title),
        Some(&user.id),
        ip.as_deref(),
        Some(serde_json::json!({
            "listing_id": booking.listing_id,
            "check_in": booking.check_in,
            "check_out": booking.check_out,
            "guests": booking.guests,
        })),
    )
    .await;

    tracing::info!(
        booking_id = %booking.id,
        listing_id = %booking.listing_id,
        user_id = %user.id,
        "Booking created"
    );

    Ok((StatusCode::CREATED, Json(booking)))
}

/// Bookings made by the current caller, with listing details attached.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: User,
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
        WHERE b.user_id = ?
        ORDER BY b.created_at ASC
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bookings))
}

/// Cancel one of the caller's own bookings. Only pending bookings can
/// be cancelled; resolved ones report a conflict.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingActionResponse>, ApiError> {
    // Validate ID format
    if let Err(e) = validate_uuid(&id, "booking_id") {
        return Err(ApiError::validation_field("booking_id", e));
    }

    let existing = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(TransitionError::NotFound)?;

    // Other users' bookings look like missing ones from here
    if existing.user_id != user.id {
        return Err(TransitionError::NotFound.into());
    }

    let booking = apply_transition(&state.db, &id, BookingAction::Cancel).await?;

    record_booking_cancelled();

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::BOOKING_CANCEL,
        resource_types::BOOKING,
        Some(&booking.id),
        None,
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!(booking_id = %booking.id, user_id = %user.id, "Booking cancelled by guest");

    Ok(Json(BookingActionResponse {
        message: "Booking cancelled successfully".to_string(),
        booking,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::BookingStatus;
    use axum::response::IntoResponse;

    async fn test_state() -> Arc<AppState> {
        let db = crate::db::init_in_memory().await.unwrap();
        Arc::new(AppState::new(Config::default(), db))
    }

    async fn insert_user(db: &DbPool, email: &str) -> User {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at) VALUES (?, ?, ?, ?, 'user', ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind("hash")
        .bind("Test User")
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    async fn insert_listing(db: &DbPool, host_id: &str, price: f64, max_guests: i64) -> Listing {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO listings (id, host_id, title, description, price_per_night, property_type, address, max_guests, created_at, updated_at)
            VALUES (?, ?, 'Harbour View Flat', 'Two rooms', ?, 'apartment', '14 Quay Street', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(host_id)
        .bind(price)
        .bind(max_guests)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();

        sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    fn booking_request(listing_id: &str, check_in: &str, check_out: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            listing_id: listing_id.to_string(),
            check_in: check_in.to_string(),
            check_out: check_out.to_string(),
            guests: 2,
        }
    }

    #[tokio::test]
    async fn test_create_booking_prices_by_night() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 120.0, 4).await;

        let (status, Json(booking)) = create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-04")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(booking.total_price, 360.0);
        assert_eq!(booking.status_enum(), BookingStatus::Pending);
        assert_eq!(booking.user_id, guest.id);
    }

    #[tokio::test]
    async fn test_create_booking_rejects_overlap() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let rival = insert_user(&state.db, "rival@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 120.0, 4).await;

        create_booking(
            State(state.clone()),
            guest,
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-05")),
        )
        .await
        .unwrap();

        let err = create_booking(
            State(state.clone()),
            rival.clone(),
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-04", "2030-09-06")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        // A back-to-back stay starting on the departure date is fine
        create_booking(
            State(state.clone()),
            rival,
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-05", "2030-09-07")),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_booking_ignores_cancelled_overlap() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let rival = insert_user(&state.db, "rival@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 120.0, 4).await;

        let (_, Json(first)) = create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-05")),
        )
        .await
        .unwrap();

        cancel_booking(
            State(state.clone()),
            guest,
            Path(first.id),
            HeaderMap::new(),
        )
        .await
        .unwrap();

        create_booking(
            State(state.clone()),
            rival,
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-02", "2030-09-06")),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_booking_guards() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 120.0, 2).await;

        // Unknown listing
        let err = create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(booking_request(
                &Uuid::new_v4().to_string(),
                "2030-09-01",
                "2030-09-03",
            )),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        // Host booking their own listing
        let err = create_booking(
            State(state.clone()),
            host,
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-03")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        // Too many guests for the listing
        let mut req = booking_request(&listing.id, "2030-09-01", "2030-09-03");
        req.guests = 5;
        let err = create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(req),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        // Stay starting in the past
        let err = create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2020-09-01", "2020-09-03")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        // Departure before arrival
        let err = create_booking(
            State(state.clone()),
            guest,
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-03", "2030-09-01")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_apply_transition_state_machine() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 100.0, 4).await;

        let (_, Json(booking)) = create_booking(
            State(state.clone()),
            guest,
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-03")),
        )
        .await
        .unwrap();

        let confirmed = apply_transition(&state.db, &booking.id, BookingAction::Confirm)
            .await
            .unwrap();
        assert_eq!(confirmed.status_enum(), BookingStatus::Confirmed);

        // A second action on the resolved booking reports a conflict
        let err = apply_transition(&state.db, &booking.id, BookingAction::Cancel)
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // And the status is unchanged
        let after = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
            .bind(&booking.id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(after.status_enum(), BookingStatus::Confirmed);

        // Unknown ids report not found instead of silently updating nothing
        let err = apply_transition(&state.db, &Uuid::new_v4().to_string(), BookingAction::Confirm)
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_booking_scopes_to_owner() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let other = insert_user(&state.db, "other@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 100.0, 4).await;

        let (_, Json(booking)) = create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-03")),
        )
        .await
        .unwrap();

        let err = cancel_booking(
            State(state.clone()),
            other,
            Path(booking.id.clone()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let Json(response) = cancel_booking(
            State(state.clone()),
            guest.clone(),
            Path(booking.id.clone()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(response.message, "Booking cancelled successfully");
        assert_eq!(response.booking.status_enum(), BookingStatus::Cancelled);

        // Cancelling again reports a conflict
        let err = cancel_booking(
            State(state.clone()),
            guest,
            Path(booking.id),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_my_bookings_joins_listing_title() {
        let state = test_state().await;
        let host = insert_user(&state.db, "host@example.com").await;
        let guest = insert_user(&state.db, "guest@example.com").await;
        let listing = insert_listing(&state.db, &host.id, 100.0, 4).await;

        create_booking(
            State(state.clone()),
            guest.clone(),
            HeaderMap::new(),
            Json(booking_request(&listing.id, "2030-09-01", "2030-09-03")),
        )
        .await
        .unwrap();

        let Json(mine) = my_bookings(State(state.clone()), guest).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].listing_title, "Harbour View Flat");
        assert_eq!(mine[0].listing_address, "14 Quay Street");
        assert_eq!(mine[0].guest_email, "guest@example.com");

        let Json(others) = my_bookings(State(state.clone()), host).await.unwrap();
        assert!(others.is_empty());
    }
}
