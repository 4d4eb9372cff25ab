//! Phoenix Guard - client identification, rate limiting and abuse detection.
//!
//! The core (identifier resolution, limiter, attack detector, counter
//! stores) lives in `phoenix-guard-service`; the axum transport in
//! `phoenix-guard-http`. This crate wires both into a server binary.

pub mod config;

pub use phoenix_guard_http::{AppState, BucketGuard, guard_middleware, router, serve};
pub use phoenix_guard_service::{ServiceConfig, ServiceState};
