//! Listing models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Listing {
    pub id: String,
    pub host_id: String,
    pub title: String,
    pub description: String,
    /// Nightly rate in the platform currency
    pub price_per_night: f64,
    pub property_type: String,
    pub address: String,
    pub max_guests: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing row joined with its host, for the detail page and the
/// moderation surface
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ListingWithHost {
    pub id: String,
    pub host_id: String,
    pub title: String,
    pub description: String,
    pub price_per_night: f64,
    pub property_type: String,
    pub address: String,
    pub max_guests: i64,
    pub created_at: String,
    pub updated_at: String,
    pub host_name: String,
    pub host_email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    pub price_per_night: f64,
    pub property_type: String,
    pub address: String,
    pub max_guests: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateListingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price_per_night: Option<f64>,
    pub property_type: Option<String>,
    pub address: Option<String>,
    pub max_guests: Option<i64>,
}

/// Query parameters for browsing the public catalogue
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListingQuery {
    /// Filter by property type (e.g. "apartment")
    pub property_type: Option<String>,
    /// Only listings at or above this nightly rate
    pub min_price: Option<f64>,
    /// Only listings at or below this nightly rate
    pub max_price: Option<f64>,
    /// Only listings that sleep at least this many guests
    pub guests: Option<i64>,
}
