//! Strongly-typed identifiers used across the catalog.
//!
//! All identifiers end up embedded in composite sort keys (`INV#{warehouse}#{region}`),
//! so none of them may contain the `#` separator.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Identifier of a product (partition key `PRODUCT#{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

/// Identifier of a warehouse holding stock for a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WarehouseId(String);

/// Region code (e.g. `us-east-1`).
///
/// Restricted to ASCII alphanumerics and `-`. Underscores are rejected so the
/// per-region accumulator attribute encoding (`inc_us_east_1`) stays reversible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

fn validate_segment(kind: &str, value: &str) -> Result<(), CatalogError> {
    if value.trim().is_empty() {
        return Err(CatalogError::validation(format!("{kind} cannot be empty")));
    }
    if value.contains('#') {
        return Err(CatalogError::validation(format!(
            "{kind} cannot contain '#': {value}"
        )));
    }
    Ok(())
}

fn validate_product(value: &str) -> Result<(), CatalogError> {
    validate_segment("product_id", value)
}

fn validate_warehouse(value: &str) -> Result<(), CatalogError> {
    validate_segment("warehouse_id", value)
}

fn validate_region(value: &str) -> Result<(), CatalogError> {
    validate_segment("region_code", value)?;
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(CatalogError::validation(format!(
            "region_code may only contain ASCII letters, digits and '-': {value}"
        )));
    }
    Ok(())
}

macro_rules! impl_string_newtype {
    ($t:ty, $validate:path) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Result<Self, CatalogError> {
                let value = value.into();
                $validate(&value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = CatalogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = CatalogError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(ProductId, validate_product);
impl_string_newtype!(WarehouseId, validate_warehouse);
impl_string_newtype!(RegionCode, validate_region);

impl RegionCode {
    /// Attribute-safe form of the region (`us-east-1` -> `us_east_1`).
    pub fn attr_suffix(&self) -> String {
        self.0.replace('-', "_")
    }

    /// Inverse of [`RegionCode::attr_suffix`].
    pub fn from_attr_suffix(suffix: &str) -> Result<Self, CatalogError> {
        Self::new(suffix.replace('_', "-"))
    }
}
