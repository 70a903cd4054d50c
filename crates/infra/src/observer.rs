//! Change observer.
//!
//! Consumes per-key change notifications from one region's feed:
//!
//! - every notification is logged
//! - inventory keys get their merged quantity recomputed and materialized at
//!   `MERGED#{warehouse}#{region}` (a plain put, so replays are harmless)
//! - a liveness heartbeat is written at most once per interval; a failed
//!   heartbeat is logged and never fails the batch

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use globalcat_core::{CatalogError, ItemKey, ReadMode, RecordKind};
use globalcat_events::{ChangeEvent, ChangeKind};
use globalcat_inventory::merge_inventory;
use globalcat_store::{RegionalStore, Row, StoreError};

/// Partition component under which heartbeats are written (`SYSTEM#STREAM`).
pub const HEARTBEAT_PARTITION: &str = "STREAM";
pub const HEARTBEAT_COMPONENT: &str = "stream_processor";

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome counts of one handled batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub recomputed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub heartbeat_written: bool,
}

#[derive(Debug)]
pub struct ChangeObserver<S> {
    store: S,
    heartbeat_interval: Duration,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl<S> ChangeObserver<S>
where
    S: RegionalStore,
{
    pub fn new(store: S, heartbeat_interval: Duration) -> Self {
        Self {
            store,
            heartbeat_interval,
            last_heartbeat: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self, events), fields(region = %self.store.region(), received = events.len()))]
    pub async fn handle_batch(&self, events: Vec<ChangeEvent>) -> BatchReport {
        let mut report = BatchReport {
            received: events.len(),
            ..BatchReport::default()
        };
        info!(records = events.len(), "change batch received");

        for event in &events {
            info!(
                kind = event.kind.as_str(),
                key = %event.key,
                source = %event.source,
                origin = %event.origin,
                "change observed"
            );

            match self.handle_event(event).await {
                Ok(true) => report.recomputed += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(key = %event.key, error = %err, "merged quantity recompute failed");
                }
            }
        }

        report.heartbeat_written = self.heartbeat_if_due().await;
        report
    }

    /// Returns true when a merged value was materialized.
    async fn handle_event(&self, event: &ChangeEvent) -> Result<bool, ObserverError> {
        let RecordKind::Inventory {
            product_id,
            warehouse_id,
            region,
        } = event.key.kind()?
        else {
            return Ok(false);
        };
        if event.kind == ChangeKind::Remove {
            return Ok(false);
        }

        let Some(row) = self.store.get(&event.key, ReadMode::Strong).await? else {
            debug!(key = %event.key, "inventory row gone before recompute");
            return Ok(false);
        };
        let merged_qty = merge_inventory(&row)?;

        let merged = Row::empty(ItemKey::merged(&product_id, &warehouse_id, &region))
            .with("merged_qty", merged_qty)
            .with("computed_at", Utc::now().to_rfc3339());
        self.store.put(merged).await?;

        debug!(key = %event.key, merged_qty, "merged quantity materialized");
        Ok(true)
    }

    /// Write a heartbeat if none succeeded within the interval.
    ///
    /// Failures are logged and swallowed; the next call retries.
    pub async fn heartbeat_if_due(&self) -> bool {
        let due = match self.last_heartbeat.lock() {
            Ok(last) => last.is_none_or(|at| at.elapsed() >= self.heartbeat_interval),
            Err(_) => true,
        };
        if !due {
            return false;
        }

        let now = Utc::now();
        let row = Row::empty(ItemKey::heartbeat(HEARTBEAT_PARTITION, now))
            .with("component", HEARTBEAT_COMPONENT)
            .with("status", "ok")
            .with("region", self.store.region().as_str());

        match self.store.put(row).await {
            Ok(()) => {
                if let Ok(mut last) = self.last_heartbeat.lock() {
                    *last = Some(Instant::now());
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "heartbeat write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use globalcat_core::{ProductId, RegionCode, WarehouseId};
    use globalcat_core::key::SYSTEM_PREFIX;
    use globalcat_store::{RegionReplica, ReplicatedTable};
    use serde_json::json;

    fn us() -> RegionCode {
        RegionCode::new("us-east-1").unwrap()
    }

    fn inv_key() -> ItemKey {
        ItemKey::inventory(
            &ProductId::new("p-1").unwrap(),
            &WarehouseId::new("wh-1").unwrap(),
            &us(),
        )
    }

    fn merged_key() -> ItemKey {
        ItemKey::merged(
            &ProductId::new("p-1").unwrap(),
            &WarehouseId::new("wh-1").unwrap(),
            &us(),
        )
    }

    fn event(kind: ChangeKind, key: ItemKey) -> ChangeEvent {
        ChangeEvent::new(kind, key, "GlobalCatalog/stream/us-east-1", us(), us())
    }

    fn setup(interval: Duration) -> (Arc<ReplicatedTable>, ChangeObserver<RegionReplica>) {
        let table = ReplicatedTable::new("GlobalCatalog", [us()]);
        let observer = ChangeObserver::new(table.region(&us()).unwrap(), interval);
        (table, observer)
    }

    async fn heartbeats(observer: &ChangeObserver<RegionReplica>) -> usize {
        observer
            .store()
            .query(&format!("{SYSTEM_PREFIX}{HEARTBEAT_PARTITION}"), "HEARTBEAT#", ReadMode::Strong)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn inventory_change_materializes_merged_quantity() {
        let (_table, observer) = setup(Duration::from_secs(60));
        let deltas = BTreeMap::from([("inc_us_east_1".to_string(), 9), ("dec_eu_west_1".to_string(), 2)]);
        observer.store().numeric_add(&inv_key(), &deltas).await.unwrap();

        let report = observer
            .handle_batch(vec![
                event(ChangeKind::Insert, inv_key()),
                event(ChangeKind::Modify, ItemKey::new("PRODUCT#p-1", "REGION#us-east-1")),
            ])
            .await;

        assert_eq!(report.received, 2);
        assert_eq!(report.recomputed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let merged = observer
            .store()
            .get(&merged_key(), ReadMode::Strong)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.get("merged_qty"), Some(&json!(7)));
        assert!(merged.get_str("computed_at").is_some());

        let inv = observer.store().get(&inv_key(), ReadMode::Strong).await.unwrap().unwrap();
        assert!(inv.get("merged_qty").is_none());
    }

    #[tokio::test]
    async fn replayed_notifications_are_idempotent() {
        let (_table, observer) = setup(Duration::from_secs(60));
        let deltas = BTreeMap::from([("inc_us_east_1".to_string(), 3)]);
        observer.store().numeric_add(&inv_key(), &deltas).await.unwrap();

        observer.handle_batch(vec![event(ChangeKind::Insert, inv_key())]).await;
        let first = observer.store().get(&merged_key(), ReadMode::Strong).await.unwrap().unwrap();
        observer.handle_batch(vec![event(ChangeKind::Insert, inv_key())]).await;
        let second = observer.store().get(&merged_key(), ReadMode::Strong).await.unwrap().unwrap();

        assert_eq!(first.get("merged_qty"), second.get("merged_qty"));
    }

    #[tokio::test]
    async fn corrupt_accumulator_fails_only_that_record() {
        let (_table, observer) = setup(Duration::from_secs(60));
        observer
            .store()
            .put(Row::empty(inv_key()).with("inc_us_east_1", "lots"))
            .await
            .unwrap();

        let report = observer
            .handle_batch(vec![
                event(ChangeKind::Modify, inv_key()),
                event(ChangeKind::Remove, inv_key()),
            ])
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn heartbeat_is_written_at_most_once_per_interval() {
        let (_table, observer) = setup(Duration::from_secs(60));

        assert!(observer.handle_batch(Vec::new()).await.heartbeat_written);
        assert!(!observer.handle_batch(Vec::new()).await.heartbeat_written);
        assert_eq!(heartbeats(&observer).await, 1);

        let row = observer
            .store()
            .query("SYSTEM#STREAM", "HEARTBEAT#", ReadMode::Strong)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(row.get_str("component"), Some(HEARTBEAT_COMPONENT));
        assert_eq!(row.get_str("status"), Some("ok"));
    }

    #[tokio::test]
    async fn heartbeat_failure_does_not_fail_the_batch() {
        let (table, observer) = setup(Duration::ZERO);
        table.set_unavailable(&us(), true);

        let report = observer
            .handle_batch(vec![event(ChangeKind::Modify, ItemKey::new("PRODUCT#p-1", "REGION#us-east-1"))])
            .await;
        assert_eq!(report.received, 1);
        assert_eq!(report.skipped, 1);
        assert!(!report.heartbeat_written);

        table.set_unavailable(&us(), false);
        assert!(observer.handle_batch(Vec::new()).await.heartbeat_written);
    }
}
