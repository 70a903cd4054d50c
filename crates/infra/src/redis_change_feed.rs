//! Redis Streams change feed.
//!
//! Change notifications are appended with `XADD` and consumed through a
//! consumer group with `XREADGROUP`:
//!
//! - **Stream key**: `globalcat:changes:{region}` (one stream per regional replica)
//! - **Consumer groups**: one per observer deployment, e.g. `change-observer`
//! - **Acknowledgement**: `XACK` once a page has been handed to the in-process
//!   subscription, before the observer has processed it. A crash after the
//!   hand-off loses those notifications; the merged row for an affected key
//!   is recomputed on that key's next change. Entries read but not yet handed
//!   off stay pending and are re-read (`XREADGROUP ... 0`) when the poller
//!   reconnects under the same consumer name.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::Commands;
use tracing::{debug, error, instrument, warn};

use globalcat_core::RegionCode;
use globalcat_events::{ChangeEvent, EventBus, Subscription};

const STREAM_PREFIX: &str = "globalcat:changes";
const DEFAULT_GROUP: &str = "change-observer";
const READ_COUNT: usize = 100;
const BLOCK_MS: usize = 250;

#[derive(Debug, thiserror::Error)]
pub enum ChangeFeedError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsChangeFeed {
    client: Arc<redis::Client>,
    stream_key: String,
}

impl RedisStreamsChangeFeed {
    /// Feed for one region's replica (`redis_url` e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>, region: &RegionCode) -> Result<Self, ChangeFeedError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ChangeFeedError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key(region),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    fn connection(&self) -> Result<redis::Connection, ChangeFeedError> {
        self.client
            .get_connection()
            .map_err(|e| ChangeFeedError::Connection(e.to_string()))
    }

    /// Create the consumer group (and stream) if missing. Idempotent.
    pub fn ensure_consumer_group(&self, group: &str) -> Result<(), ChangeFeedError> {
        let mut conn = self.connection()?;
        let created: redis::RedisResult<String> =
            conn.xgroup_create_mkstream(&self.stream_key, group, "0");
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(ChangeFeedError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    #[instrument(skip(self, event), fields(stream_key = %self.stream_key, key = %event.key), err)]
    fn append(&self, event: &ChangeEvent) -> Result<(), ChangeFeedError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| ChangeFeedError::Serialization(e.to_string()))?;
        let mut conn = self.connection()?;

        let _: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[
                    ("kind", event.kind.as_str()),
                    ("pk", event.key.pk.as_str()),
                    ("sk", event.key.sk.as_str()),
                    ("payload", payload.as_str()),
                ],
            )
            .map_err(|e| ChangeFeedError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }

    /// Read one page of entries. `start` is `0` for this consumer's pending
    /// entries or `>` for new ones.
    fn read(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
        start: &str,
    ) -> Result<Vec<StreamId>, ChangeFeedError> {
        let mut opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(READ_COUNT);
        if start == ">" {
            opts = opts.block(BLOCK_MS);
        }

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[start], &opts)
            .map_err(|e| ChangeFeedError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply.keys.into_iter().flat_map(|k| k.ids).collect())
    }

    fn acknowledge(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        ids: &[String],
    ) -> Result<(), ChangeFeedError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: u64 = conn
            .xack(&self.stream_key, group, ids)
            .map_err(|e| ChangeFeedError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Subscribe through a named consumer group.
    ///
    /// A background thread polls the group and forwards decoded notifications
    /// into the returned subscription, acknowledging each page once forwarded.
    /// Undecodable entries are acknowledged and dropped with a warning.
    pub fn subscribe_with_group(&self, group: &str, consumer: &str) -> Subscription<ChangeEvent> {
        if let Err(e) = self.ensure_consumer_group(group) {
            error!(group, error = %e, "failed to create consumer group");
        }

        let (tx, rx) = mpsc::channel();
        let feed = self.clone();
        let group = group.to_string();
        let consumer = consumer.to_string();

        let spawned = thread::Builder::new()
            .name(format!("redis-feed-{consumer}"))
            .spawn(move || feed.poll_loop(&group, &consumer, tx));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn change feed poller");
        }

        Subscription::new(rx)
    }

    fn poll_loop(&self, group: &str, consumer: &str, tx: mpsc::Sender<ChangeEvent>) {
        let mut conn = None;
        // drain entries left pending by a previous run before reading new ones
        let mut start = "0";

        loop {
            if conn.is_none() {
                match self.connection() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        warn!(error = %e, "change feed reconnect failed");
                        thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            let entries = match self.read(c, group, consumer, start) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "change feed read failed");
                    conn = None;
                    start = "0";
                    thread::sleep(Duration::from_millis(250));
                    continue;
                }
            };
            if start == "0" && entries.is_empty() {
                start = ">";
                continue;
            }

            let Some(handled) = forward(entries, &tx) else {
                debug!("change feed subscriber dropped");
                return;
            };
            if let Err(e) = self.acknowledge(c, group, &handled) {
                warn!(error = %e, "change feed acknowledge failed");
            }
        }
    }
}

/// Hand one page to the subscriber and return the ids to acknowledge.
///
/// `None` means the subscriber is gone and nothing from the page is acknowledged.
fn forward(entries: Vec<StreamId>, tx: &mpsc::Sender<ChangeEvent>) -> Option<Vec<String>> {
    let mut handled = Vec::with_capacity(entries.len());
    for entry in entries {
        match decode(&entry) {
            Ok(event) => tx.send(event).ok()?,
            Err(e) => warn!(id = %entry.id, error = %e, "dropping undecodable change entry"),
        }
        handled.push(entry.id);
    }
    Some(handled)
}

fn stream_key(region: &RegionCode) -> String {
    format!("{STREAM_PREFIX}:{region}")
}

fn decode(entry: &StreamId) -> Result<ChangeEvent, ChangeFeedError> {
    let payload: String = entry
        .get("payload")
        .ok_or_else(|| ChangeFeedError::Serialization("missing payload field".to_string()))?;
    serde_json::from_str(&payload).map_err(|e| ChangeFeedError::Serialization(e.to_string()))
}

impl EventBus<ChangeEvent> for RedisStreamsChangeFeed {
    type Error = ChangeFeedError;

    fn publish(&self, message: ChangeEvent) -> Result<(), Self::Error> {
        self.append(&message)
    }

    fn subscribe(&self) -> Subscription<ChangeEvent> {
        self.subscribe_with_group(
            DEFAULT_GROUP,
            &format!("consumer-{}", uuid::Uuid::now_v7()),
        )
    }
}
