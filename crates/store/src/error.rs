use std::time::Duration;

use thiserror::Error;

use globalcat_core::{CatalogError, ItemKey, RegionCode};

/// Regional store adapter error.
///
/// `Unavailable` and `Timeout` are transient and retried inside the adapter's
/// budget; everything else is surfaced immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("attribute {attribute} of {key} is not an integer")]
    NonNumeric { key: ItemKey, attribute: String },

    #[error("unknown region: {0}")]
    UnknownRegion(RegionCode),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NonNumeric { .. } => CatalogError::corruption(err.to_string()),
            StoreError::Unavailable(_)
            | StoreError::Timeout(_)
            | StoreError::UnknownRegion(_)
            | StoreError::Backend(_) => CatalogError::store_unavailable(err.to_string()),
        }
    }
}
