//! Postgres-backed regional store.
//!
//! One region's replica is a Postgres primary, optionally paired with a
//! read replica for eventual reads. Rows live in a single table keyed by
//! `(pk, sk)` with the attribute map in a `jsonb` column.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (connection exception) | `08***` | `Unavailable` |
//! | Database (serialization / deadlock) | `40001`, `40P01` | `Unavailable` |
//! | Database (admin shutdown) | `57P01` | `Unavailable` |
//! | Database (other) | Any other | `Backend` |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |
//!
//! Transient codes are retried by [`crate::RetryingStore`]; everything else
//! surfaces on the first attempt.
//!
//! ## Change Notifications
//!
//! With [`PostgresRegionalStore::with_change_feed`] every committed `put` and
//! `numeric_add` publishes a [`ChangeEvent`] for the written key. Publishing
//! happens after commit and is best-effort: a failed publish is logged and
//! the write still succeeds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Row as _};
use tracing::{instrument, warn};

use globalcat_core::{ItemKey, ReadMode, RegionCode};
use globalcat_events::{ChangeEvent, ChangeKind, EventBus};

use crate::adapter::RegionalStore;
use crate::error::StoreError;
use crate::row::{Attributes, Row};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_items (
    pk          TEXT        NOT NULL,
    sk          TEXT        NOT NULL,
    attrs       JSONB       NOT NULL DEFAULT '{}'::jsonb,
    written_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (pk, sk)
)
"#;

/// Object-safe publish side of a change feed.
trait ChangeSink: Send + Sync {
    fn publish_change(&self, event: ChangeEvent);
}

impl<B> ChangeSink for B
where
    B: EventBus<ChangeEvent> + Send + Sync,
{
    fn publish_change(&self, event: ChangeEvent) {
        if let Err(e) = self.publish(event) {
            warn!(error = ?e, "change notification dropped");
        }
    }
}

#[derive(Clone)]
pub struct PostgresRegionalStore {
    region: RegionCode,
    primary: Arc<PgPool>,
    replica: Option<Arc<PgPool>>,
    feed: Option<Arc<dyn ChangeSink>>,
}

impl fmt::Debug for PostgresRegionalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRegionalStore")
            .field("region", &self.region)
            .field("replica", &self.replica.is_some())
            .field("change_feed", &self.feed.is_some())
            .finish()
    }
}

impl PostgresRegionalStore {
    pub fn new(region: RegionCode, primary: PgPool) -> Self {
        Self {
            region,
            primary: Arc::new(primary),
            replica: None,
            feed: None,
        }
    }

    /// Route eventual reads to a read replica.
    pub fn with_replica(mut self, replica: PgPool) -> Self {
        self.replica = Some(Arc::new(replica));
        self
    }

    /// Publish a notification for every committed write.
    pub fn with_change_feed<B>(mut self, feed: B) -> Self
    where
        B: EventBus<ChangeEvent> + Send + Sync + 'static,
    {
        self.feed = Some(Arc::new(feed));
        self
    }

    fn notify(&self, kind: ChangeKind, key: &ItemKey) {
        if let Some(feed) = &self.feed {
            feed.publish_change(ChangeEvent::new(
                kind,
                key.clone(),
                format!("catalog_items/{}", self.region),
                self.region.clone(),
                self.region.clone(),
            ));
        }
    }

    /// Create the backing table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.primary)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    fn pool_for(&self, mode: ReadMode) -> &PgPool {
        match (mode, &self.replica) {
            (ReadMode::Eventual, Some(replica)) => replica.as_ref(),
            _ => self.primary.as_ref(),
        }
    }
}

fn decode_attrs(key: &ItemKey, value: Value) -> Result<Attributes, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Attributes::new()),
        other => Err(StoreError::backend(format!(
            "attrs of {key} is not an object: {other}"
        ))),
    }
}

#[async_trait]
impl RegionalStore for PostgresRegionalStore {
    fn region(&self) -> &RegionCode {
        &self.region
    }

    #[instrument(skip(self), fields(region = %self.region, key = %key, mode = %mode), err)]
    async fn get(&self, key: &ItemKey, mode: ReadMode) -> Result<Option<Row>, StoreError> {
        let row = sqlx::query("SELECT attrs FROM catalog_items WHERE pk = $1 AND sk = $2")
            .bind(&key.pk)
            .bind(&key.sk)
            .fetch_optional(self.pool_for(mode))
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Json(attrs): Json<Value> = row
            .try_get("attrs")
            .map_err(|e| map_sqlx_error("get", e))?;
        Ok(Some(Row::new(key.clone(), decode_attrs(key, attrs)?)))
    }

    #[instrument(skip(self, row), fields(region = %self.region, key = %row.key), err)]
    async fn put(&self, row: Row) -> Result<(), StoreError> {
        let written = sqlx::query(
            r#"
            INSERT INTO catalog_items (pk, sk, attrs, written_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (pk, sk) DO UPDATE
            SET attrs = EXCLUDED.attrs, written_at = EXCLUDED.written_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&row.key.pk)
        .bind(&row.key.sk)
        .bind(Json(Value::Object(row.attrs)))
        .fetch_one(&*self.primary)
        .await
        .map_err(|e| map_sqlx_error("put", e))?;
        let inserted: bool = written
            .try_get("inserted")
            .map_err(|e| map_sqlx_error("put", e))?;

        self.notify(change_kind(inserted), &row.key);
        Ok(())
    }

    #[instrument(skip(self, deltas), fields(region = %self.region, key = %key), err)]
    async fn numeric_add(
        &self,
        key: &ItemKey,
        deltas: &BTreeMap<String, i64>,
    ) -> Result<Row, StoreError> {
        let mut tx = self
            .primary
            .begin()
            .await
            .map_err(|e| map_sqlx_error("numeric_add", e))?;

        let created = sqlx::query(
            "INSERT INTO catalog_items (pk, sk) VALUES ($1, $2) ON CONFLICT (pk, sk) DO NOTHING",
        )
        .bind(&key.pk)
        .bind(&key.sk)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("numeric_add", e))?
        .rows_affected()
            == 1;

        let locked = sqlx::query(
            "SELECT attrs FROM catalog_items WHERE pk = $1 AND sk = $2 FOR UPDATE",
        )
        .bind(&key.pk)
        .bind(&key.sk)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("numeric_add", e))?;
        let Json(attrs): Json<Value> = locked
            .try_get("attrs")
            .map_err(|e| map_sqlx_error("numeric_add", e))?;

        let mut row = Row::new(key.clone(), decode_attrs(key, attrs)?);
        row.apply_deltas(deltas)?;

        sqlx::query(
            "UPDATE catalog_items SET attrs = $3, written_at = now() WHERE pk = $1 AND sk = $2",
        )
        .bind(&key.pk)
        .bind(&key.sk)
        .bind(Json(Value::Object(row.attrs.clone())))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("numeric_add", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("numeric_add", e))?;

        self.notify(change_kind(created), key);
        Ok(row)
    }

    #[instrument(skip(self), fields(region = %self.region, mode = %mode), err)]
    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        mode: ReadMode,
    ) -> Result<Vec<Row>, StoreError> {
        let rows = sqlx::query(
            "SELECT sk, attrs FROM catalog_items WHERE pk = $1 AND starts_with(sk, $2)",
        )
        .bind(partition)
        .bind(sort_prefix)
        .fetch_all(self.pool_for(mode))
        .await
        .map_err(|e| map_sqlx_error("query", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let sk: String = row.try_get("sk").map_err(|e| map_sqlx_error("query", e))?;
            let Json(attrs): Json<Value> = row
                .try_get("attrs")
                .map_err(|e| map_sqlx_error("query", e))?;
            let key = ItemKey::new(partition, sk);
            let attrs = decode_attrs(&key, attrs)?;
            out.push(Row::new(key, attrs));
        }
        Ok(out)
    }
}

fn change_kind(inserted: bool) -> ChangeKind {
    if inserted {
        ChangeKind::Insert
    } else {
        ChangeKind::Modify
    }
}

/// Map SQLx errors to `StoreError`, splitting transient from permanent failures.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if is_transient_code(code.as_ref()) => StoreError::Unavailable(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::unavailable(format!("io error in {}: {}", operation, e)),
        _ => StoreError::backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_transient_code(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01")
}
