//! Product register operations.
//!
//! Writes overwrite the whole row with no read-before-write. Concurrent writes
//! to the same key from different regions are reconciled by the store's own
//! last-writer-wins replication; the catalog only surfaces the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use globalcat_core::{
    elapsed_ms, resolve_read_mode, CatalogConfig, CatalogError, CatalogResult, ItemKey,
    ProductId, ReadMode, ReadOutcome, RegionCode,
};
use globalcat_store::{Attributes, RegionalStore, Row};

use crate::record::{product_row, stamp_of, timestamp, LAST_WRITER_REGION};

pub const CONFLICT_NOTE: &str = "Read back after ~1-2s to see winner.";
pub const MERGE_EXPLANATION: &str =
    "Replicas reconcile concurrent updates; the later update (by store write timestamp) wins.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub ok: bool,
    pub latency_ms: f64,
    pub item: Row,
}

/// Which region's write the stored row reflects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeExplanation {
    pub current: Row,
    pub winner_region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    pub explanation: &'static str,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_title_local() -> String {
    "LOCAL_TITLE".to_string()
}

fn default_price_local() -> f64 {
    100.0
}

fn default_title_remote() -> String {
    "REMOTE_TITLE".to_string()
}

fn default_price_remote() -> f64 {
    101.0
}

/// Two divergent writes to the same product key from two regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRequest {
    pub product_id: String,
    #[serde(default = "default_region")]
    pub region_code: String,
    #[serde(default = "default_title_local")]
    pub title_local: String,
    #[serde(default = "default_price_local")]
    pub price_local: f64,
    #[serde(default = "default_title_remote")]
    pub title_remote: String,
    #[serde(default = "default_price_remote")]
    pub price_remote: f64,
}

impl ConflictRequest {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            region_code: default_region(),
            title_local: default_title_local(),
            price_local: default_price_local(),
            title_remote: default_title_remote(),
            price_remote: default_price_remote(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictOutcome {
    pub written_local: Row,
    pub written_remote: Row,
    pub note: &'static str,
}

#[derive(Debug, Clone)]
pub struct ProductService<S> {
    store: S,
    replica: Option<S>,
    config: Arc<CatalogConfig>,
}

impl<S> ProductService<S>
where
    S: RegionalStore,
{
    /// `store` must write into the configured home region.
    pub fn new(store: S, config: Arc<CatalogConfig>) -> Self {
        Self {
            store,
            replica: None,
            config,
        }
    }

    /// Second-region adapter used by [`ProductService::simulate_conflict`].
    pub fn with_replica(mut self, replica: S) -> Self {
        self.replica = Some(replica);
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Overwrite the product row for `(product_id, region_code)`.
    #[instrument(skip(self, payload), fields(home = %self.config.home_region))]
    pub async fn write(
        &self,
        product_id: &ProductId,
        region_code: &RegionCode,
        payload: Attributes,
    ) -> CatalogResult<WriteOutcome> {
        let row = product_row(
            product_id,
            region_code,
            &self.config.home_region,
            Utc::now(),
            payload,
        );

        let started = Instant::now();
        self.store.put(row.clone()).await?;
        let latency_ms = elapsed_ms(started);

        Ok(WriteOutcome {
            ok: true,
            latency_ms,
            item: row,
        })
    }

    /// Read a product row in the mode the consistency policy selects.
    ///
    /// Absent rows are `Ok` with `value: None`; callers decide whether that is a 404.
    #[instrument(skip(self))]
    pub async fn read(
        &self,
        product_id: &ProductId,
        region_code: &RegionCode,
    ) -> CatalogResult<ReadOutcome<Option<Row>>> {
        let mode = resolve_read_mode(
            region_code,
            &self.config.home_region,
            self.config.read_consistency,
        );
        let key = ItemKey::product(product_id, region_code);

        let started = Instant::now();
        let value = self.store.get(&key, mode).await?;
        let latency_ms = elapsed_ms(started);

        Ok(ReadOutcome {
            value,
            mode,
            latency_ms,
            region: self.config.home_region.clone(),
        })
    }

    /// Report the currently visible row and which region wrote it.
    ///
    /// Uses an eventual read so the answer reflects what replication delivered.
    #[instrument(skip(self))]
    pub async fn explain_winner(
        &self,
        product_id: &ProductId,
        region_code: &RegionCode,
    ) -> CatalogResult<MergeExplanation> {
        let key = ItemKey::product(product_id, region_code);
        let current = self
            .store
            .get(&key, ReadMode::Eventual)
            .await?
            .ok_or(CatalogError::NotFound)?;

        let winner_region = current
            .get_str(LAST_WRITER_REGION)
            .unwrap_or("unknown")
            .to_string();
        let updated_at = stamp_of(&current).map(|stamp| timestamp(stamp.at));

        Ok(MergeExplanation {
            current,
            winner_region,
            updated_at,
            explanation: MERGE_EXPLANATION,
        })
    }

    /// Write divergent title/price values to one key from the home region and
    /// then from the replica region.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn simulate_conflict(&self, request: &ConflictRequest) -> CatalogResult<ConflictOutcome> {
        let replica = self
            .replica
            .as_ref()
            .ok_or_else(|| CatalogError::validation("no replica region configured"))?;
        let product_id = ProductId::new(request.product_id.as_str())?;
        let region_code = RegionCode::new(request.region_code.as_str())?;

        let local_at = Utc::now();
        let local = conflict_payload(&request.title_local, request.price_local);
        let written_local = product_row(
            &product_id,
            &region_code,
            &self.config.home_region,
            local_at,
            local,
        );
        self.store.put(written_local.clone()).await?;

        // the remote write must carry a strictly later timestamp
        let remote_at = std::cmp::max(Utc::now(), local_at + chrono::Duration::microseconds(1));
        let remote = conflict_payload(&request.title_remote, request.price_remote);
        let written_remote = product_row(
            &product_id,
            &region_code,
            replica.region(),
            remote_at,
            remote,
        );
        replica.put(written_remote.clone()).await?;

        info!(
            local = %self.config.home_region,
            remote = %replica.region(),
            "conflicting product writes issued"
        );

        Ok(ConflictOutcome {
            written_local,
            written_remote,
            note: CONFLICT_NOTE,
        })
    }
}

fn conflict_payload(title: &str, price: f64) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("title".to_string(), Value::from(title));
    attrs.insert("price".to_string(), Value::from(price));
    attrs
}
