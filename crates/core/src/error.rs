//! Catalog error model.

use thiserror::Error;

/// Result type used across the catalog core.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Catalog-level error.
///
/// `NotFound` is an expected outcome (user-facing 404), everything else is a
/// failure of the request. Heartbeat failures never reach this type; the change
/// observer logs and swallows them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The requested key is absent.
    #[error("not found")]
    NotFound,

    /// A negative increment/decrement was supplied. Rejected before any store call.
    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    /// A request value failed validation (malformed identifier, bad payload).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The store could not be reached within the timeout/retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored accumulator held something other than a non-negative integer.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl CatalogError {
    pub fn invalid_delta(msg: impl Into<String>) -> Self {
        Self::InvalidDelta(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::DataCorruption(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
