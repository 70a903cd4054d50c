//! Regional store abstraction and backends.
//!
//! - [`RegionalStore`]: one region's view of the replicated table
//! - [`RetryingStore`]: bounded timeout + retry decorator
//! - [`ReplicatedTable`]: in-memory multi-region table with lagging replication
//! - `PostgresRegionalStore` (feature `postgres`): durable backend

pub mod adapter;
pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod retry;
pub mod row;

pub use adapter::RegionalStore;
pub use error::StoreError;
pub use memory::{RegionReplica, ReplicatedTable, ReplicatorHandle};
#[cfg(feature = "postgres")]
pub use postgres::PostgresRegionalStore;
pub use retry::{RetryPolicy, RetryingStore};
pub use row::{Attributes, Row};
