use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use globalcat_core::{ItemKey, ReadMode, RegionCode};

use crate::error::StoreError;
use crate::row::Row;

/// Uniform interface to one region's view of the replicated key-value store.
///
/// The store's own replication and reconciliation stay behind this trait; the
/// catalog never coordinates regions itself.
///
/// ## Contract
///
/// - `get`: `Strong` reflects every write previously acknowledged through this
///   region; `Eventual` may be stale. An absent key is `Ok(None)`.
/// - `put`: unconditional overwrite of the whole row.
/// - `numeric_add`: atomic add per attribute, absent attributes start at 0,
///   returns the post-update row. Concurrent callers never lose updates.
/// - `query`: all rows of a partition whose sort key starts with a prefix.
///   Row order is unspecified.
#[async_trait]
pub trait RegionalStore: Send + Sync {
    /// Region this adapter writes into (the caller's home region).
    fn region(&self) -> &RegionCode;

    async fn get(&self, key: &ItemKey, mode: ReadMode) -> Result<Option<Row>, StoreError>;

    async fn put(&self, row: Row) -> Result<(), StoreError>;

    async fn numeric_add(
        &self,
        key: &ItemKey,
        deltas: &BTreeMap<String, i64>,
    ) -> Result<Row, StoreError>;

    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        mode: ReadMode,
    ) -> Result<Vec<Row>, StoreError>;
}

#[async_trait]
impl<S> RegionalStore for Arc<S>
where
    S: RegionalStore + ?Sized,
{
    fn region(&self) -> &RegionCode {
        (**self).region()
    }

    async fn get(&self, key: &ItemKey, mode: ReadMode) -> Result<Option<Row>, StoreError> {
        (**self).get(key, mode).await
    }

    async fn put(&self, row: Row) -> Result<(), StoreError> {
        (**self).put(row).await
    }

    async fn numeric_add(
        &self,
        key: &ItemKey,
        deltas: &BTreeMap<String, i64>,
    ) -> Result<Row, StoreError> {
        (**self).numeric_add(key, deltas).await
    }

    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        mode: ReadMode,
    ) -> Result<Vec<Row>, StoreError> {
        (**self).query(partition, sort_prefix, mode).await
    }
}
