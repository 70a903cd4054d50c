use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use globalcat_core::{ItemKey, RegionCode};

/// Kind of mutation a change notification reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Modify => "MODIFY",
            ChangeKind::Remove => "REMOVE",
        }
    }
}

/// A per-key mutation notification, as observed by one region's replica.
///
/// Notifications for the same key arrive in order; there is no ordering across
/// keys. Delivery is at-least-once, so consumers must tolerate replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: Uuid,
    pub kind: ChangeKind,
    pub key: ItemKey,
    /// Identifier of the feed that produced the notification (table + region).
    pub source: String,
    /// Region whose replica applied the mutation.
    pub region: RegionCode,
    /// Region that originally accepted the write.
    pub origin: RegionCode,
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        kind: ChangeKind,
        key: ItemKey,
        source: impl Into<String>,
        region: RegionCode,
        origin: RegionCode,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            kind,
            key,
            source: source.into(),
            region,
            origin,
            observed_at: Utc::now(),
        }
    }

    /// True when the mutation was replicated in from another region.
    pub fn is_replicated(&self) -> bool {
        self.region != self.origin
    }
}

/// Messages that belong to one region's feed.
///
/// Workers can be pinned to a region so they ignore notifications observed by
/// other replicas.
pub trait RegionScoped {
    fn region(&self) -> &RegionCode;
}

impl RegionScoped for ChangeEvent {
    fn region(&self) -> &RegionCode {
        &self.region
    }
}
