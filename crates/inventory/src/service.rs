//! Inventory operations against a regional store.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument};

use globalcat_core::key::INVENTORY_PREFIX;
use globalcat_core::{
    elapsed_ms, CatalogConfig, CatalogError, CatalogResult, ItemKey, ProductId, ReadMode,
    RecordKind, RegionCode, WarehouseId,
};
use globalcat_store::{RegionalStore, Row};

use crate::counter::{delta_attrs, merge_inventory};

/// Result of a delta application: the post-update row and its merged quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaApplied {
    pub item: Row,
    pub merged_qty: i64,
    pub latency_ms: f64,
}

/// Merged view of a single inventory location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationView {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub region: RegionCode,
    pub qty: i64,
    pub raw: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationQty {
    pub sk: String,
    pub qty: i64,
}

/// Every location of a product with its merged quantity, plus the total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductInventory {
    pub product_id: ProductId,
    pub total_qty: i64,
    pub locations: Vec<LocationQty>,
}

#[derive(Debug, Clone)]
pub struct InventoryService<S> {
    store: S,
    config: Arc<CatalogConfig>,
}

impl<S> InventoryService<S>
where
    S: RegionalStore,
{
    pub fn new(store: S, config: Arc<CatalogConfig>) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Add this region's increment/decrement to a location's counter.
    ///
    /// Negative amounts are rejected before the store is touched. The
    /// accumulators written are always the home region's, whatever region the
    /// location key names.
    #[instrument(skip(self), fields(home = %self.config.home_region))]
    pub async fn apply_delta(
        &self,
        product_id: &ProductId,
        warehouse_id: &WarehouseId,
        region: &RegionCode,
        inc: i64,
        dec: i64,
    ) -> CatalogResult<DeltaApplied> {
        if inc < 0 || dec < 0 {
            return Err(CatalogError::invalid_delta(format!(
                "inc and dec must be non-negative (inc={inc}, dec={dec})"
            )));
        }

        let key = ItemKey::inventory(product_id, warehouse_id, region);
        let deltas = delta_attrs(&self.config.home_region, inc, dec);

        let started = Instant::now();
        let item = self.store.numeric_add(&key, &deltas).await?;
        let latency_ms = elapsed_ms(started);

        let merged_qty = merge_inventory(&item)?;
        debug!(%key, merged_qty, latency_ms, "inventory delta applied");

        Ok(DeltaApplied {
            item,
            merged_qty,
            latency_ms,
        })
    }

    /// Strongly consistent read of one location, merged.
    #[instrument(skip(self))]
    pub async fn read_location(
        &self,
        product_id: &ProductId,
        warehouse_id: &WarehouseId,
        region: &RegionCode,
    ) -> CatalogResult<LocationView> {
        let key = ItemKey::inventory(product_id, warehouse_id, region);
        let raw = self
            .store
            .get(&key, ReadMode::Strong)
            .await?
            .ok_or(CatalogError::NotFound)?;
        let qty = merge_inventory(&raw)?;

        Ok(LocationView {
            product_id: product_id.clone(),
            warehouse_id: warehouse_id.clone(),
            region: region.clone(),
            qty,
            raw,
        })
    }

    /// Strongly consistent fan-out over every inventory location of a product.
    ///
    /// A product with no locations reports a total of 0.
    #[instrument(skip(self))]
    pub async fn read_product(&self, product_id: &ProductId) -> CatalogResult<ProductInventory> {
        let partition = ItemKey::product_partition(product_id);
        let rows = self
            .store
            .query(&partition, INVENTORY_PREFIX, ReadMode::Strong)
            .await?;

        let mut locations = Vec::with_capacity(rows.len());
        let mut total_qty: i64 = 0;
        for row in rows {
            if !matches!(row.key.kind()?, RecordKind::Inventory { .. }) {
                continue;
            }
            let qty = merge_inventory(&row)?;
            total_qty = total_qty.saturating_add(qty);
            locations.push(LocationQty {
                sk: row.key.sk,
                qty,
            });
        }
        locations.sort_by(|a, b| a.sk.cmp(&b.sk));

        Ok(ProductInventory {
            product_id: product_id.clone(),
            total_qty,
            locations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalcat_core::ConsistencyPolicy;
    use globalcat_store::{RegionReplica, ReplicatedTable};

    fn us() -> RegionCode {
        RegionCode::new("us-east-1").unwrap()
    }

    fn eu() -> RegionCode {
        RegionCode::new("eu-west-1").unwrap()
    }

    fn pid() -> ProductId {
        ProductId::new("p-1").unwrap()
    }

    fn wh() -> WarehouseId {
        WarehouseId::new("wh-1").unwrap()
    }

    fn service(table: &Arc<ReplicatedTable>, home: RegionCode) -> InventoryService<RegionReplica> {
        let other = if home == us() { eu() } else { us() };
        let config = Arc::new(CatalogConfig::new(home.clone(), other, ConsistencyPolicy::StrongLocal));
        InventoryService::new(table.region(&home).unwrap(), config)
    }

    #[tokio::test]
    async fn two_regions_converge_to_ten_minus_three() {
        let table = ReplicatedTable::new("GlobalCatalog", [us(), eu()]);
        let a = service(&table, us());
        let b = service(&table, eu());

        let first = a.apply_delta(&pid(), &wh(), &us(), 10, 0).await.unwrap();
        assert_eq!(first.merged_qty, 10);
        b.apply_delta(&pid(), &wh(), &us(), 0, 3).await.unwrap();

        table.replicate_all();

        for svc in [&a, &b] {
            let view = svc.read_location(&pid(), &wh(), &us()).await.unwrap();
            assert_eq!(view.qty, 7);
        }
    }

    #[tokio::test]
    async fn negative_delta_is_rejected_without_touching_the_store() {
        let table = ReplicatedTable::new("GlobalCatalog", [us(), eu()]);
        let svc = service(&table, us());
        svc.apply_delta(&pid(), &wh(), &us(), 5, 0).await.unwrap();

        let err = svc.apply_delta(&pid(), &wh(), &us(), -1, 0).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidDelta(_)));
        let err = svc.apply_delta(&pid(), &wh(), &us(), 0, -4).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidDelta(_)));

        assert_eq!(table.pending(), 1);
        let view = svc.read_location(&pid(), &wh(), &us()).await.unwrap();
        assert_eq!(view.qty, 5);
    }

    #[tokio::test]
    async fn zero_delta_leaves_quantity_unchanged() {
        let table = ReplicatedTable::new("GlobalCatalog", [us(), eu()]);
        let svc = service(&table, us());
        svc.apply_delta(&pid(), &wh(), &us(), 8, 2).await.unwrap();

        let applied = svc.apply_delta(&pid(), &wh(), &us(), 0, 0).await.unwrap();
        assert_eq!(applied.merged_qty, 6);
    }

    #[tokio::test]
    async fn duplicate_delivery_double_counts() {
        let table = ReplicatedTable::new("GlobalCatalog", [us(), eu()]);
        let a = service(&table, us());
        let b = service(&table, eu());

        a.apply_delta(&pid(), &wh(), &us(), 4, 0).await.unwrap();
        table.replicate_all();
        table.redeliver_last();

        let remote = b.read_location(&pid(), &wh(), &us()).await.unwrap();
        assert_eq!(remote.qty, 8);
    }

    #[tokio::test]
    async fn missing_location_is_not_found() {
        let table = ReplicatedTable::new("GlobalCatalog", [us(), eu()]);
        let svc = service(&table, us());
        let err = svc.read_location(&pid(), &wh(), &us()).await.unwrap_err();
        assert_eq!(err, CatalogError::NotFound);
    }

    #[tokio::test]
    async fn product_fan_out_totals_every_location() {
        let table = ReplicatedTable::new("GlobalCatalog", [us(), eu()]);
        let svc = service(&table, us());
        let wh2 = WarehouseId::new("wh-2").unwrap();

        svc.apply_delta(&pid(), &wh(), &us(), 10, 1).await.unwrap();
        svc.apply_delta(&pid(), &wh2, &eu(), 5, 0).await.unwrap();

        let inventory = svc.read_product(&pid()).await.unwrap();
        assert_eq!(inventory.total_qty, 14);
        assert_eq!(
            inventory.locations,
            vec![
                LocationQty { sk: "INV#wh-1#us-east-1".into(), qty: 9 },
                LocationQty { sk: "INV#wh-2#eu-west-1".into(), qty: 5 },
            ]
        );

        let empty = svc.read_product(&ProductId::new("p-none").unwrap()).await.unwrap();
        assert_eq!(empty.total_qty, 0);
        assert!(empty.locations.is_empty());
    }
}
