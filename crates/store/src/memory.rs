//! In-memory multi-region replicated table (tests/dev, default binary backend).
//!
//! Models a globally replicated table with one replica per region:
//!
//! - A write is applied synchronously to the accepting region's replica and
//!   queued for every other region.
//! - Puts replicate as full-row state and are reconciled by last-writer-wins on
//!   a table-internal [`LwwStamp`] (the store's own clock, not any
//!   `updated_at` attribute the caller wrote).
//! - Numeric adds replicate as operations: each delta is re-applied once per
//!   destination, so disjoint per-region attributes converge by addition.
//! - Each replica keeps a primary copy (strong reads) and a lagging secondary
//!   copy (eventual reads) refreshed on every replication tick.
//! - Every mutation a replica applies, local or replicated, is published on
//!   that region's change feed.
//!
//! Delivery is at-least-once on request: [`ReplicatedTable::redeliver_last`]
//! replays the most recent replication, which double counts numeric adds.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use globalcat_core::{ItemKey, LwwStamp, ReadMode, RegionCode};
use globalcat_events::{ChangeEvent, ChangeKind, EventBus, InMemoryEventBus};

use crate::adapter::RegionalStore;
use crate::error::StoreError;
use crate::row::Row;

#[derive(Debug, Clone)]
struct StoredRow {
    row: Row,
    stamp: LwwStamp,
}

#[derive(Debug, Default)]
struct Replica {
    primary: BTreeMap<ItemKey, StoredRow>,
    secondary: BTreeMap<ItemKey, StoredRow>,
}

#[derive(Debug, Clone)]
enum Mutation {
    Put {
        row: Row,
    },
    Add {
        key: ItemKey,
        deltas: BTreeMap<String, i64>,
    },
}

impl Mutation {
    fn key(&self) -> &ItemKey {
        match self {
            Mutation::Put { row } => &row.key,
            Mutation::Add { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone)]
struct Replication {
    target: RegionCode,
    stamp: LwwStamp,
    mutation: Mutation,
    enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct TableState {
    replicas: BTreeMap<RegionCode, Replica>,
    pending: VecDeque<Replication>,
    last_delivered: Option<Replication>,
    last_stamp: Option<DateTime<Utc>>,
    unavailable: BTreeSet<RegionCode>,
    failures: HashMap<RegionCode, u32>,
}

impl TableState {
    /// Issue the next store-internal write stamp. Strictly increasing across the table.
    fn next_stamp(&mut self, region: &RegionCode) -> LwwStamp {
        let now = Utc::now();
        let at = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(at);
        LwwStamp::new(at, region.clone())
    }

    fn check_available(&mut self, region: &RegionCode) -> Result<(), StoreError> {
        if self.unavailable.contains(region) {
            return Err(StoreError::unavailable(format!("region {region} is unreachable")));
        }
        if let Some(remaining) = self.failures.get_mut(region) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::unavailable(format!(
                    "injected failure in region {region}"
                )));
            }
        }
        Ok(())
    }

    fn replica_mut(&mut self, region: &RegionCode) -> Result<&mut Replica, StoreError> {
        self.replicas
            .get_mut(region)
            .ok_or_else(|| StoreError::UnknownRegion(region.clone()))
    }

    fn enqueue(&mut self, origin: &RegionCode, stamp: &LwwStamp, mutation: &Mutation) {
        let targets: Vec<RegionCode> = self
            .replicas
            .keys()
            .filter(|r| *r != origin)
            .cloned()
            .collect();
        let now = Instant::now();
        for target in targets {
            self.pending.push_back(Replication {
                target,
                stamp: stamp.clone(),
                mutation: mutation.clone(),
                enqueued_at: now,
            });
        }
    }
}

/// Apply a mutation to one replica's primary copy.
///
/// Returns the change kind when the replica's state changed (a stale put that
/// loses LWW reconciliation changes nothing).
fn apply_mutation(
    replica: &mut Replica,
    stamp: &LwwStamp,
    mutation: &Mutation,
) -> Result<Option<(ChangeKind, Row)>, StoreError> {
    match mutation {
        Mutation::Put { row } => {
            let existing = replica.primary.get(&row.key);
            let kind = match existing {
                Some(current) if !stamp.supersedes(&current.stamp) => return Ok(None),
                Some(_) => ChangeKind::Modify,
                None => ChangeKind::Insert,
            };
            replica.primary.insert(
                row.key.clone(),
                StoredRow {
                    row: row.clone(),
                    stamp: stamp.clone(),
                },
            );
            Ok(Some((kind, row.clone())))
        }
        Mutation::Add { key, deltas } => {
            let (kind, mut stored) = match replica.primary.get(key) {
                Some(current) => (ChangeKind::Modify, current.clone()),
                None => (
                    ChangeKind::Insert,
                    StoredRow {
                        row: Row::empty(key.clone()),
                        stamp: stamp.clone(),
                    },
                ),
            };
            stored.row.apply_deltas(deltas)?;
            if stamp.supersedes(&stored.stamp) {
                stored.stamp = stamp.clone();
            }
            let row = stored.row.clone();
            replica.primary.insert(key.clone(), stored);
            Ok(Some((kind, row)))
        }
    }
}

/// In-memory replicated table shared by all regions of a process.
#[derive(Debug)]
pub struct ReplicatedTable {
    name: String,
    state: Mutex<TableState>,
    feeds: BTreeMap<RegionCode, Arc<InMemoryEventBus<ChangeEvent>>>,
}

impl ReplicatedTable {
    pub fn new(name: impl Into<String>, regions: impl IntoIterator<Item = RegionCode>) -> Arc<Self> {
        let mut state = TableState::default();
        let mut feeds = BTreeMap::new();
        for region in regions {
            state.replicas.entry(region.clone()).or_default();
            feeds.insert(region, Arc::new(InMemoryEventBus::new()));
        }
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(state),
            feeds,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regions(&self) -> Vec<RegionCode> {
        self.feeds.keys().cloned().collect()
    }

    /// Adapter writing into `region`.
    pub fn region(self: &Arc<Self>, region: &RegionCode) -> Result<RegionReplica, StoreError> {
        if !self.feeds.contains_key(region) {
            return Err(StoreError::UnknownRegion(region.clone()));
        }
        Ok(RegionReplica {
            table: Arc::clone(self),
            region: region.clone(),
        })
    }

    /// Change feed of one region's replica.
    pub fn feed(&self, region: &RegionCode) -> Option<Arc<InMemoryEventBus<ChangeEvent>>> {
        self.feeds.get(region).cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, TableState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::unavailable("replicated table lock poisoned"))
    }

    fn source(&self, region: &RegionCode) -> String {
        format!("{}/stream/{}", self.name, region)
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            if let Some(feed) = self.feeds.get(&event.region) {
                if let Err(e) = feed.publish(event) {
                    warn!(error = ?e, "change notification dropped");
                }
            }
        }
    }

    /// Number of replications not yet delivered.
    pub fn pending(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Make `region` unreachable (or reachable again) for adapter calls.
    pub fn set_unavailable(&self, region: &RegionCode, unavailable: bool) {
        if let Ok(mut state) = self.lock() {
            if unavailable {
                state.unavailable.insert(region.clone());
            } else {
                state.unavailable.remove(region);
            }
        }
    }

    /// Fail the next `count` adapter calls against `region` with a transient error.
    pub fn fail_next(&self, region: &RegionCode, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.failures.insert(region.clone(), count);
        }
    }

    /// Deliver every pending replication and refresh every eventual-read copy.
    /// After this call all replicas have converged.
    pub fn replicate_all(&self) -> usize {
        self.deliver(|_| true)
    }

    /// Deliver replications older than `lag`, then refresh eventual-read copies.
    pub fn replicate_older_than(&self, lag: Duration) -> usize {
        self.deliver(|r| r.enqueued_at.elapsed() >= lag)
    }

    fn deliver(&self, due: impl Fn(&Replication) -> bool) -> usize {
        let mut events = Vec::new();
        let delivered = {
            let Ok(mut state) = self.lock() else {
                return 0;
            };

            let (ready, waiting): (VecDeque<_>, VecDeque<_>) =
                state.pending.drain(..).partition(|r| due(r));
            state.pending = waiting;

            let count = ready.len();
            for replication in ready {
                if let Some(event) = self.deliver_one(&mut state, &replication) {
                    events.push(event);
                }
                state.last_delivered = Some(replication);
            }

            for replica in state.replicas.values_mut() {
                replica.secondary = replica.primary.clone();
            }
            self.publish(events);
            count
        };

        if delivered > 0 {
            debug!(table = %self.name, delivered, "replication delivered");
        }
        delivered
    }

    fn deliver_one(&self, state: &mut TableState, replication: &Replication) -> Option<ChangeEvent> {
        let replica = state.replicas.get_mut(&replication.target)?;
        match apply_mutation(replica, &replication.stamp, &replication.mutation) {
            Ok(Some((kind, _row))) => Some(ChangeEvent::new(
                kind,
                replication.mutation.key().clone(),
                self.source(&replication.target),
                replication.target.clone(),
                replication.stamp.region.clone(),
            )),
            Ok(None) => None,
            Err(e) => {
                warn!(target_region = %replication.target, error = %e, "replication apply failed");
                None
            }
        }
    }

    /// Re-deliver the most recently delivered replication (at-least-once replay).
    ///
    /// Returns false when nothing has been delivered yet.
    pub fn redeliver_last(&self) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        let Some(replication) = state.last_delivered.clone() else {
            return false;
        };
        let event = self.deliver_one(&mut state, &replication);
        if let Some(replica) = state.replicas.get_mut(&replication.target) {
            replica.secondary = replica.primary.clone();
        }
        if let Some(event) = event {
            self.publish(vec![event]);
        }
        true
    }

    /// Spawn a background task delivering replications once they are `lag` old.
    pub fn spawn_replicator(self: &Arc<Self>, lag: Duration) -> ReplicatorHandle {
        let table = Arc::clone(self);
        let tick = std::cmp::max(lag / 2, Duration::from_millis(10));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                table.replicate_older_than(lag);
            }
        });
        ReplicatorHandle { task }
    }

    fn read(
        &self,
        region: &RegionCode,
        key: &ItemKey,
        mode: ReadMode,
    ) -> Result<Option<Row>, StoreError> {
        let mut state = self.lock()?;
        state.check_available(region)?;
        let replica = state.replica_mut(region)?;
        let rows = match mode {
            ReadMode::Strong => &replica.primary,
            ReadMode::Eventual => &replica.secondary,
        };
        Ok(rows.get(key).map(|s| s.row.clone()))
    }

    fn scan(
        &self,
        region: &RegionCode,
        partition: &str,
        sort_prefix: &str,
        mode: ReadMode,
    ) -> Result<Vec<Row>, StoreError> {
        let mut state = self.lock()?;
        state.check_available(region)?;
        let replica = state.replica_mut(region)?;
        let rows = match mode {
            ReadMode::Strong => &replica.primary,
            ReadMode::Eventual => &replica.secondary,
        };
        Ok(rows
            .iter()
            .filter(|(k, _)| k.pk == partition && k.sk.starts_with(sort_prefix))
            .map(|(_, s)| s.row.clone())
            .collect())
    }

    /// Notifications are published while the state lock is held, so a feed
    /// sees one key's mutations in the order they were applied.
    fn write(&self, region: &RegionCode, mutation: Mutation) -> Result<Row, StoreError> {
        let mut state = self.lock()?;
        state.check_available(region)?;
        let stamp = state.next_stamp(region);
        let replica = state.replica_mut(region)?;
        let Some((kind, row)) = apply_mutation(replica, &stamp, &mutation)? else {
            return Err(StoreError::backend("local write lost reconciliation"));
        };
        state.enqueue(region, &stamp, &mutation);
        let event = ChangeEvent::new(
            kind,
            mutation.key().clone(),
            self.source(region),
            region.clone(),
            region.clone(),
        );
        self.publish(vec![event]);
        Ok(row)
    }
}

/// Handle to the background replicator; aborts the task on shutdown or drop.
#[derive(Debug)]
pub struct ReplicatorHandle {
    task: JoinHandle<()>,
}

impl ReplicatorHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ReplicatorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One region's adapter onto a [`ReplicatedTable`].
#[derive(Debug, Clone)]
pub struct RegionReplica {
    table: Arc<ReplicatedTable>,
    region: RegionCode,
}

impl RegionReplica {
    pub fn table(&self) -> &Arc<ReplicatedTable> {
        &self.table
    }
}

#[async_trait]
impl RegionalStore for RegionReplica {
    fn region(&self) -> &RegionCode {
        &self.region
    }

    #[instrument(skip(self), fields(region = %self.region, key = %key, mode = %mode), err)]
    async fn get(&self, key: &ItemKey, mode: ReadMode) -> Result<Option<Row>, StoreError> {
        self.table.read(&self.region, key, mode)
    }

    #[instrument(skip(self, row), fields(region = %self.region, key = %row.key), err)]
    async fn put(&self, row: Row) -> Result<(), StoreError> {
        self.table.write(&self.region, Mutation::Put { row }).map(|_| ())
    }

    #[instrument(skip(self, deltas), fields(region = %self.region, key = %key), err)]
    async fn numeric_add(
        &self,
        key: &ItemKey,
        deltas: &BTreeMap<String, i64>,
    ) -> Result<Row, StoreError> {
        self.table.write(
            &self.region,
            Mutation::Add {
                key: key.clone(),
                deltas: deltas.clone(),
            },
        )
    }

    #[instrument(skip(self), fields(region = %self.region, mode = %mode), err)]
    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        mode: ReadMode,
    ) -> Result<Vec<Row>, StoreError> {
        self.table.scan(&self.region, partition, sort_prefix, mode)
    }
}
