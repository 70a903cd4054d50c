use axum::Router;

use globalcat_core::{CatalogResult, ProductId, RegionCode, WarehouseId};

pub mod conflict;
pub mod inventory;
pub mod products;
pub mod system;

/// Router for every catalog endpoint.
pub fn router() -> Router {
    Router::new()
        .merge(system::router())
        .merge(products::router())
        .merge(inventory::router())
        .merge(conflict::router())
}

pub(crate) fn product_key(product_id: &str, region_code: &str) -> CatalogResult<(ProductId, RegionCode)> {
    Ok((ProductId::new(product_id)?, RegionCode::new(region_code)?))
}

pub(crate) fn location_key(
    product_id: &str,
    warehouse_id: &str,
    region_code: &str,
) -> CatalogResult<(ProductId, WarehouseId, RegionCode)> {
    Ok((
        ProductId::new(product_id)?,
        WarehouseId::new(warehouse_id)?,
        RegionCode::new(region_code)?,
    ))
}
