pub mod auth;
pub mod rate_limit;

pub use auth::{require_authorized, CurrentUser, ErrorResponse, Policy};
