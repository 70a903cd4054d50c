//! Last-writer-wins ordering.
//!
//! A write is stamped with `(timestamp, writer region)`. Stamps are totally
//! ordered: later timestamp wins, equal timestamps fall back to the greater
//! region code. Merging registers is therefore commutative, associative and
//! idempotent, which is all convergence needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RegionCode;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LwwStamp {
    pub at: DateTime<Utc>,
    pub region: RegionCode,
}

impl LwwStamp {
    pub fn new(at: DateTime<Utc>, region: RegionCode) -> Self {
        Self { at, region }
    }

    pub fn now(region: RegionCode) -> Self {
        Self::new(Utc::now(), region)
    }

    /// True when a write carrying `self` replaces one carrying `other`.
    pub fn supersedes(&self, other: &LwwStamp) -> bool {
        self > other
    }
}

/// A value guarded by an LWW stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    stamp: LwwStamp,
    value: T,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(stamp: LwwStamp, value: T) -> Self {
        Self { stamp, value }
    }

    pub fn stamp(&self) -> &LwwStamp {
        &self.stamp
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Offer a competing write; keeps whichever carries the greater stamp.
    /// Returns true when the incoming write won.
    pub fn offer(&mut self, stamp: LwwStamp, value: T) -> bool {
        if stamp.supersedes(&self.stamp) {
            self.stamp = stamp;
            self.value = value;
            true
        } else {
            false
        }
    }

    pub fn merge(&mut self, other: &LwwRegister<T>) {
        self.offer(other.stamp.clone(), other.value.clone());
    }
}
