//! Read-consistency policy and the per-read mode selector.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::id::RegionCode;

/// Process-wide read policy. Fixed for the lifetime of a running instance.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyPolicy {
    #[default]
    /// Home-region reads are strongly consistent; reads targeting other regions are eventual.
    StrongLocal,
    /// Every read is eventual (lowest latency).
    EventualGlobal,
}

impl ConsistencyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsistencyPolicy::StrongLocal => "strong-local",
            ConsistencyPolicy::EventualGlobal => "eventual-global",
        }
    }

    /// Human-readable description of what this policy guarantees.
    pub fn explain(self) -> PolicyExplanation {
        let note = match self {
            ConsistencyPolicy::StrongLocal => {
                "Local region reads are strongly consistent; cross-region reads are eventual."
            }
            ConsistencyPolicy::EventualGlobal => {
                "All reads are eventual for lower latency; local writes still ack locally."
            }
        };
        PolicyExplanation {
            policy: self,
            note,
            how_to_change: "Set READ_CONSISTENCY env to 'strong-local' or 'eventual-global' and restart.",
        }
    }
}

impl core::fmt::Display for ConsistencyPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong-local" => Ok(ConsistencyPolicy::StrongLocal),
            "eventual-global" => Ok(ConsistencyPolicy::EventualGlobal),
            other => Err(ConfigError::invalid(
                "READ_CONSISTENCY",
                format!("expected 'strong-local' or 'eventual-global', got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyExplanation {
    pub policy: ConsistencyPolicy,
    pub note: &'static str,
    pub how_to_change: &'static str,
}

/// Consistency hint for a single store read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Reflects every write previously acknowledged in the reader's own region.
    Strong,
    /// May return a stale or not-yet-replicated row.
    Eventual,
}

impl ReadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadMode::Strong => "strong",
            ReadMode::Eventual => "eventual",
        }
    }
}

impl core::fmt::Display for ReadMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the read mode for a request.
///
/// Strong only when the policy is `strong-local` and the request targets the
/// home region; eventual otherwise.
pub fn resolve_read_mode(
    requested: &RegionCode,
    home: &RegionCode,
    policy: ConsistencyPolicy,
) -> ReadMode {
    match policy {
        ConsistencyPolicy::StrongLocal if requested == home => ReadMode::Strong,
        _ => ReadMode::Eventual,
    }
}

/// A read result annotated with the mode actually applied and its latency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome<T> {
    pub value: T,
    pub mode: ReadMode,
    pub latency_ms: f64,
    pub region: RegionCode,
}

impl<T> ReadOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
        ReadOutcome {
            value: f(self.value),
            mode: self.mode,
            latency_ms: self.latency_ms,
            region: self.region,
        }
    }
}

/// Milliseconds elapsed since `started`, rounded to two decimals.
pub fn elapsed_ms(started: std::time::Instant) -> f64 {
    let ms = started.elapsed().as_secs_f64() * 1000.0;
    (ms * 100.0).round() / 100.0
}
