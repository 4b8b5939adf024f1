//! Input validation for API requests.
//!
//! This module provides validation functions for API request data,
//! ensuring all inputs meet the required format and constraints.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex for validating email addresses
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+$"
    ).unwrap();

    /// Regex for calendar dates in YYYY-MM-DD form
    static ref DATE_REGEX: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}$"
    ).unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() < 8 {
        return Err("Password is too short (min 8 characters)".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }

    if name.len() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }

    Ok(())
}

/// Validate a listing title
pub fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Title is required".to_string());
    }

    if title.len() < 3 {
        return Err("Title is too short (min 3 characters)".to_string());
    }

    if title.len() > 140 {
        return Err("Title is too long (max 140 characters)".to_string());
    }

    Ok(())
}

/// Validate a listing description
pub fn validate_description(description: &str) -> Result<(), String> {
    if description.trim().is_empty() {
        return Err("Description is required".to_string());
    }

    if description.len() > 5000 {
        return Err("Description is too long (max 5000 characters)".to_string());
    }

    Ok(())
}

/// Validate a nightly price
pub fn validate_price(price: f64) -> Result<(), String> {
    if !price.is_finite() {
        return Err("Price must be a number".to_string());
    }

    if price <= 0.0 {
        return Err("Price must be greater than 0".to_string());
    }

    if price > 100_000.0 {
        return Err("Price is too high (max 100000 per night)".to_string());
    }

    Ok(())
}

/// Validate a property type
pub fn validate_property_type(property_type: &str) -> Result<(), String> {
    if property_type.trim().is_empty() {
        return Err("Property type is required".to_string());
    }

    if property_type.len() > 50 {
        return Err("Property type is too long (max 50 characters)".to_string());
    }

    Ok(())
}

/// Validate a street address
pub fn validate_address(address: &str) -> Result<(), String> {
    if address.trim().is_empty() {
        return Err("Address is required".to_string());
    }

    if address.len() > 500 {
        return Err("Address is too long (max 500 characters)".to_string());
    }

    Ok(())
}

/// Validate a guest count against a listing capacity
pub fn validate_guests(guests: i64, max_guests: i64) -> Result<(), String> {
    if guests < 1 {
        return Err("At least one guest is required".to_string());
    }

    if guests > max_guests {
        return Err(format!(
            "Too many guests for this listing (max {})",
            max_guests
        ));
    }

    Ok(())
}

/// Validate a listing capacity
pub fn validate_max_guests(max_guests: i64) -> Result<(), String> {
    if max_guests < 1 {
        return Err("Capacity must be at least 1 guest".to_string());
    }

    if max_guests > 50 {
        return Err("Capacity is too high (max 50 guests)".to_string());
    }

    Ok(())
}

/// Validate a calendar date in YYYY-MM-DD form
pub fn validate_date(date: &str, field_name: &str) -> Result<(), String> {
    if date.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if !DATE_REGEX.is_match(date) {
        return Err(format!("{} must be a date in YYYY-MM-DD format", field_name));
    }

    // The regex only checks shape, this rejects dates like 2024-02-31
    if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(format!("{} is not a valid calendar date", field_name));
    }

    Ok(())
}

/// Validate that a date is today or later
pub fn validate_not_past(date: &str, field_name: &str) -> Result<(), String> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| format!("{} is not a valid calendar date", field_name))?;

    if parsed < chrono::Utc::now().date_naive() {
        return Err(format!("{} cannot be in the past", field_name));
    }

    Ok(())
}

/// Validate that a stay covers at least one night
pub fn validate_date_range(check_in: &str, check_out: &str) -> Result<(), String> {
    let start = chrono::NaiveDate::parse_from_str(check_in, "%Y-%m-%d")
        .map_err(|_| "Check-in is not a valid calendar date".to_string())?;
    let end = chrono::NaiveDate::parse_from_str(check_out, "%Y-%m-%d")
        .map_err(|_| "Check-out is not a valid calendar date".to_string())?;

    if end <= start {
        return Err("Check-out must be after check-in".to_string());
    }

    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}
