//! HTTP middleware: rate limiting, request ID tracking, admin authentication.

pub mod auth;
pub mod rate_limit;
pub mod request_id;
