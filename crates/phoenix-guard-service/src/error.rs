//! Service-layer error types.
//!
//! `ServiceError` is transport-agnostic. The HTTP crate maps it to status
//! codes and JSON bodies; request validation and admin credentials are
//! transport concerns and never reach this layer.

use crate::store::StoreError;

/// Service error shared across transports.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Identifier is on the block list.
    #[error("client is blocked")]
    Blocked,

    /// Counter store failed and the failure mode says to surface it.
    #[error(transparent)]
    Store(#[from] StoreError),
}
