use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::runtime::Handle;
use tracing::{info, warn};

use globalcat_core::{CatalogConfig, RegionCode};
use globalcat_events::{ChangeEvent, EventBus};
#[cfg(feature = "postgres")]
use globalcat_events::InMemoryEventBus;
use globalcat_infra::{ChangeObserver, ObserverWorker, WorkerHandle, WorkerOptions};
use globalcat_inventory::InventoryService;
use globalcat_products::ProductService;
use globalcat_store::{RegionalStore, ReplicatedTable, ReplicatorHandle, RetryPolicy, RetryingStore};

#[cfg(feature = "postgres")]
use globalcat_store::PostgresRegionalStore;
#[cfg(feature = "postgres")]
use sqlx::PgPool;

/// Backend-erased regional store.
pub type SharedStore = Arc<dyn RegionalStore>;

/// What every service talks to: a backend behind the timeout/retry budget.
pub type CatalogStore = RetryingStore<SharedStore>;

/// Long-running tasks owned by the process.
#[derive(Default)]
struct Background {
    replicator: Option<ReplicatorHandle>,
    worker: Option<WorkerHandle>,
}

pub struct AppServices {
    pub config: Arc<CatalogConfig>,
    pub products: ProductService<CatalogStore>,
    pub inventory: InventoryService<CatalogStore>,
    table: Option<Arc<ReplicatedTable>>,
    background: Mutex<Background>,
}

impl AppServices {
    fn assemble(
        config: Arc<CatalogConfig>,
        home: CatalogStore,
        remote: CatalogStore,
        table: Option<Arc<ReplicatedTable>>,
        background: Background,
    ) -> Self {
        Self {
            products: ProductService::new(home.clone(), Arc::clone(&config)).with_replica(remote),
            inventory: InventoryService::new(home, Arc::clone(&config)),
            config,
            table,
            background: Mutex::new(background),
        }
    }

    /// The in-memory replicated table, when that backend is in use.
    pub fn replicated_table(&self) -> Option<&Arc<ReplicatedTable>> {
        self.table.as_ref()
    }

    /// Stop the replicator and the change observer worker.
    pub async fn shutdown(&self) {
        let background = match self.background.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        if let Some(replicator) = background.replicator {
            replicator.shutdown();
        }
        if let Some(worker) = background.worker {
            if let Err(e) = tokio::task::spawn_blocking(move || worker.shutdown()).await {
                warn!(error = %e, "observer worker did not stop cleanly");
            }
        }
        info!("background tasks stopped");
    }
}

/// Select and wire the storage backend.
///
/// `USE_PERSISTENT_STORES=true` selects Postgres when the `postgres` feature is
/// compiled in; otherwise the in-memory replicated table is used.
pub async fn build_services(config: CatalogConfig) -> anyhow::Result<AppServices> {
    let config = Arc::new(config);

    if config.persistence.enabled {
        #[cfg(feature = "postgres")]
        {
            return build_persistent_services(config).await;
        }

        #[cfg(not(feature = "postgres"))]
        {
            warn!("USE_PERSISTENT_STORES=true but postgres feature not enabled, falling back to in-memory");
        }
    }

    build_in_memory_services(config)
}

fn build_in_memory_services(config: Arc<CatalogConfig>) -> anyhow::Result<AppServices> {
    let table = ReplicatedTable::new(
        config.table_name.clone(),
        [config.home_region.clone(), config.replica_region.clone()],
    );

    let home = retrying(table.region(&config.home_region)?, &config);
    let remote = retrying(table.region(&config.replica_region)?, &config);

    let replicator = table.spawn_replicator(config.replication_lag);
    let feed = table
        .feed(&config.home_region)
        .context("home region has no change feed")?;
    let worker = spawn_observer(feed, home.clone(), &config, Some(config.home_region.clone()))?;

    info!(
        table = %config.table_name,
        home = %config.home_region,
        replica = %config.replica_region,
        lag_ms = config.replication_lag.as_millis() as u64,
        "in-memory replicated table ready"
    );

    Ok(AppServices::assemble(
        config,
        home,
        remote,
        Some(table),
        Background {
            replicator: Some(replicator),
            worker: Some(worker),
        },
    ))
}

#[cfg(feature = "postgres")]
async fn build_persistent_services(config: Arc<CatalogConfig>) -> anyhow::Result<AppServices> {
    let settings = &config.persistence;
    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let primary = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let mut home = PostgresRegionalStore::new(config.home_region.clone(), primary.clone());
    if let Some(replica_url) = &settings.database_replica_url {
        let replica = PgPool::connect(replica_url)
            .await
            .context("failed to connect to Postgres read replica")?;
        home = home.with_replica(replica);
    }
    home.ensure_schema()
        .await
        .context("failed to create catalog schema")?;

    // writes attributed to the replica region land on the same primary
    let remote = PostgresRegionalStore::new(config.replica_region.clone(), primary);

    let redis_url = settings.redis_url.clone();
    #[cfg(feature = "redis")]
    if let Some(url) = redis_url {
        let feed = globalcat_infra::RedisStreamsChangeFeed::new(&url, &config.home_region)
            .context("failed to open Redis change feed")?;
        info!(stream = feed.stream_key(), "publishing changes to Redis Streams");
        return observed_postgres(config, home, remote, feed);
    }
    #[cfg(not(feature = "redis"))]
    if redis_url.is_some() {
        warn!("REDIS_URL is set but the redis feature is disabled; using an in-process change feed");
    }
    observed_postgres(config, home, remote, InMemoryEventBus::<ChangeEvent>::new())
}

/// Attach `feed` to both Postgres stores and run the observer on it.
#[cfg(feature = "postgres")]
fn observed_postgres<B>(
    config: Arc<CatalogConfig>,
    home: PostgresRegionalStore,
    remote: PostgresRegionalStore,
    feed: B,
) -> anyhow::Result<AppServices>
where
    B: EventBus<ChangeEvent> + Send + Sync + 'static,
{
    let feed = Arc::new(feed);
    let home = retrying(home.with_change_feed(feed.clone()), &config);
    let remote = retrying(remote.with_change_feed(feed.clone()), &config);

    // one primary backs both regions, so the observer takes every notification
    let worker = spawn_observer(feed, home.clone(), &config, None)?;
    info!(home = %config.home_region, "postgres regional store ready");

    Ok(AppServices::assemble(
        config,
        home,
        remote,
        None,
        Background {
            replicator: None,
            worker: Some(worker),
        },
    ))
}

fn retrying<S>(store: S, config: &CatalogConfig) -> CatalogStore
where
    S: RegionalStore + 'static,
{
    RetryingStore::new(Arc::new(store) as SharedStore, RetryPolicy::from(&config.store))
}

fn spawn_observer<B>(
    feed: B,
    store: CatalogStore,
    config: &CatalogConfig,
    region: Option<RegionCode>,
) -> anyhow::Result<WorkerHandle>
where
    B: EventBus<ChangeEvent> + Send + Sync + 'static,
{
    let observer = Arc::new(ChangeObserver::new(store, config.heartbeat_interval));
    let handle = ObserverWorker::spawn(
        "change-observer",
        feed,
        observer,
        Handle::current(),
        WorkerOptions {
            region,
            ..WorkerOptions::default()
        },
    )
    .context("failed to spawn change observer worker")?;
    Ok(handle)
}
