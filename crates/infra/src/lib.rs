//! Infrastructure layer: change observation, background workers, Redis change feed.

pub mod observer;
pub mod worker;

#[cfg(feature = "redis")]
pub mod redis_change_feed;

pub use observer::{
    BatchReport, ChangeObserver, ObserverError, HEARTBEAT_COMPONENT, HEARTBEAT_PARTITION,
};
pub use worker::{ObserverWorker, WorkerHandle, WorkerOptions};

#[cfg(feature = "redis")]
pub use redis_change_feed::{ChangeFeedError, RedisStreamsChangeFeed};
