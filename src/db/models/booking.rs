//! Booking models and the status state machine.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// Lifecycle states for a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Awaiting moderation, the only state that accepts transitions
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Confirmed and cancelled bookings are archived and never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Cancelled)
    }

    pub fn can_become(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(format!("Unknown booking status: {}", s)),
        }
    }
}

impl From<String> for BookingStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(BookingStatus::Pending)
    }
}

/// Moderation actions an administrator can apply to a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Confirm,
    Cancel,
}

impl BookingAction {
    pub fn target_status(&self) -> BookingStatus {
        match self {
            BookingAction::Confirm => BookingStatus::Confirmed,
            BookingAction::Cancel => BookingStatus::Cancelled,
        }
    }

    /// Past-tense verb used in success messages
    pub fn past_tense(&self) -> &'static str {
        match self {
            BookingAction::Confirm => "confirmed",
            BookingAction::Cancel => "cancelled",
        }
    }
}

impl std::str::FromStr for BookingAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "confirm" => Ok(BookingAction::Confirm),
            "cancel" => Ok(BookingAction::Cancel),
            _ => Err(format!("Unknown booking action: {}", s)),
        }
    }
}

/// Why a requested status transition could not be applied
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Booking not found")]
    NotFound,

    #[error("Booking is already {0} and cannot be modified")]
    AlreadyResolved(BookingStatus),
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: String,
    pub listing_id: String,
    pub user_id: String,
    /// Arrival date as YYYY-MM-DD
    pub check_in: String,
    /// Departure date as YYYY-MM-DD, exclusive
    pub check_out: String,
    pub guests: i64,
    pub total_price: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Booking {
    /// Get the status as a BookingStatus enum
    pub fn status_enum(&self) -> BookingStatus {
        BookingStatus::from(self.status.clone())
    }
}

/// Booking row joined with listing and guest details, for the trips,
/// host-reservations and moderation views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookingWithDetails {
    pub id: String,
    pub listing_id: String,
    pub user_id: String,
    pub check_in: String,
    pub check_out: String,
    pub guests: i64,
    pub total_price: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub listing_title: String,
    pub listing_address: String,
    pub guest_name: String,
    pub guest_email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub listing_id: String,
    pub check_in: String,
    pub check_out: String,
    pub guests: i64,
}

/// Body of the moderation PATCH. The action string is parsed into a
/// BookingAction so unknown values fail before touching the database.
#[derive(Debug, Deserialize)]
pub struct BookingActionRequest {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct BookingActionResponse {
    pub message: String,
    pub booking: Booking,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            BookingStatus::from_str("pending").unwrap(),
            BookingStatus::Pending
        );
        assert_eq!(
            BookingStatus::from_str("CONFIRMED").unwrap(),
            BookingStatus::Confirmed
        );
        assert_eq!(
            BookingStatus::from_str("cancelled").unwrap(),
            BookingStatus::Cancelled
        );
        assert!(BookingStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_status_display_roundtrip() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(BookingStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transition_matrix() {
        assert!(BookingStatus::Pending.can_become(BookingStatus::Confirmed));
        assert!(BookingStatus::Pending.can_become(BookingStatus::Cancelled));
        assert!(!BookingStatus::Pending.can_become(BookingStatus::Pending));
        assert!(!BookingStatus::Confirmed.can_become(BookingStatus::Cancelled));
        assert!(!BookingStatus::Confirmed.can_become(BookingStatus::Pending));
        assert!(!BookingStatus::Cancelled.can_become(BookingStatus::Confirmed));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            BookingAction::from_str("confirm").unwrap(),
            BookingAction::Confirm
        );
        assert_eq!(
            BookingAction::from_str("Cancel").unwrap(),
            BookingAction::Cancel
        );
        assert!(BookingAction::from_str("archive").is_err());
        assert!(BookingAction::from_str("").is_err());
    }

    #[test]
    fn test_action_targets() {
        assert_eq!(
            BookingAction::Confirm.target_status(),
            BookingStatus::Confirmed
        );
        assert_eq!(
            BookingAction::Cancel.target_status(),
            BookingStatus::Cancelled
        );
        assert_eq!(BookingAction::Confirm.past_tense(), "confirmed");
        assert_eq!(BookingAction::Cancel.past_tense(), "cancelled");
    }
}
