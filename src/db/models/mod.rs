//! Database models split into domain-specific modules.
//!
//! Everything is re-exported flat so call sites can use `crate::db::User`.

pub mod audit;
pub mod booking;
pub mod listing;
pub mod user;

pub use audit::*;
pub use booking::*;
pub use listing::*;
pub use user::*;
