//! Persisted key layout.
//!
//! Partition keys are `PRODUCT#{id}` or `SYSTEM#{component}`. The sort key
//! encodes the record kind:
//!
//! | sort key | record |
//! |---|---|
//! | `REGION#{code}` | product snapshot for a region slot |
//! | `INV#{warehouse}#{region}` | inventory accumulators |
//! | `MERGED#{warehouse}#{region}` | materialized merged quantity |
//! | `HEARTBEAT#{timestamp}` | liveness row |

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::id::{ProductId, RegionCode, WarehouseId};

pub const PRODUCT_PREFIX: &str = "PRODUCT#";
pub const SYSTEM_PREFIX: &str = "SYSTEM#";
pub const REGION_PREFIX: &str = "REGION#";
pub const INVENTORY_PREFIX: &str = "INV#";
pub const MERGED_PREFIX: &str = "MERGED#";
pub const HEARTBEAT_PREFIX: &str = "HEARTBEAT#";

/// Composite primary key of a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    pub fn product_partition(product_id: &ProductId) -> String {
        format!("{PRODUCT_PREFIX}{product_id}")
    }

    pub fn product(product_id: &ProductId, region: &RegionCode) -> Self {
        Self::new(
            Self::product_partition(product_id),
            format!("{REGION_PREFIX}{region}"),
        )
    }

    pub fn inventory(product_id: &ProductId, warehouse_id: &WarehouseId, region: &RegionCode) -> Self {
        Self::new(
            Self::product_partition(product_id),
            format!("{INVENTORY_PREFIX}{warehouse_id}#{region}"),
        )
    }

    pub fn merged(product_id: &ProductId, warehouse_id: &WarehouseId, region: &RegionCode) -> Self {
        Self::new(
            Self::product_partition(product_id),
            format!("{MERGED_PREFIX}{warehouse_id}#{region}"),
        )
    }

    pub fn heartbeat(component: &str, at: DateTime<Utc>) -> Self {
        Self::new(
            format!("{SYSTEM_PREFIX}{component}"),
            format!(
                "{HEARTBEAT_PREFIX}{}",
                at.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        )
    }

    /// Decode the record kind this key addresses.
    pub fn kind(&self) -> Result<RecordKind, CatalogError> {
        if let Some(component) = self.pk.strip_prefix(SYSTEM_PREFIX) {
            return match self.sk.strip_prefix(HEARTBEAT_PREFIX) {
                Some(at) => Ok(RecordKind::Heartbeat {
                    component: component.to_string(),
                    at: at.to_string(),
                }),
                None => Ok(RecordKind::Other),
            };
        }

        let Some(product) = self.pk.strip_prefix(PRODUCT_PREFIX) else {
            return Ok(RecordKind::Other);
        };
        let product_id = ProductId::new(product)?;

        if let Some(region) = self.sk.strip_prefix(REGION_PREFIX) {
            return Ok(RecordKind::Product {
                product_id,
                region: RegionCode::new(region)?,
            });
        }
        if let Some(rest) = self.sk.strip_prefix(INVENTORY_PREFIX) {
            let (warehouse_id, region) = split_location(rest)?;
            return Ok(RecordKind::Inventory {
                product_id,
                warehouse_id,
                region,
            });
        }
        if let Some(rest) = self.sk.strip_prefix(MERGED_PREFIX) {
            let (warehouse_id, region) = split_location(rest)?;
            return Ok(RecordKind::Merged {
                product_id,
                warehouse_id,
                region,
            });
        }

        Ok(RecordKind::Other)
    }
}

impl core::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

fn split_location(rest: &str) -> Result<(WarehouseId, RegionCode), CatalogError> {
    let (warehouse, region) = rest
        .split_once('#')
        .ok_or_else(|| CatalogError::validation(format!("malformed location sort key: {rest}")))?;
    Ok((WarehouseId::new(warehouse)?, RegionCode::new(region)?))
}

/// What a key addresses, decoded from the key layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Product {
        product_id: ProductId,
        region: RegionCode,
    },
    Inventory {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        region: RegionCode,
    },
    Merged {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        region: RegionCode,
    },
    Heartbeat {
        component: String,
        at: String,
    },
    Other,
}
