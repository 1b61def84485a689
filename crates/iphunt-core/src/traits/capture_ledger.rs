// # Capture Ledger Trait
//
// Defines the interface for the durable log of successful acquisitions.
//
// ## Purpose
//
// Every address a worker acquires and binds is appended here as a
// `Capture`. The ledger is an event log, not a set: finding the same
// address twice yields two rows.
//
// ## Implementations
//
// - File-based: JSON lines, one capture per line
// - In-memory: for tests and embedding

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::LedgerConfig;

/// A successfully acquired-and-bound address
///
/// Persisted as
/// `{"account": "...", "address": "...", "range": "...", "timestamp": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Account that captured the address
    pub account: String,
    /// The captured address
    pub address: String,
    /// Canonical form of the range it matched
    pub range: String,
    /// When the capture happened
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Capture {
    /// Create a capture stamped with the current time
    pub fn new(
        account: impl Into<String>,
        address: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            address: address.into(),
            range: range.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Trait for capture ledger implementations
///
/// # Thread Safety
///
/// All workers of a hunt append concurrently; implementations serialize
/// appends internally (single-writer discipline).
///
/// # Failure Semantics
///
/// Callers treat a failed `record` as a logged incident only. The captured
/// address exists whether or not the ledger row made it to disk.
#[async_trait]
pub trait CaptureLedger: Send + Sync {
    /// Append a capture
    async fn record(&self, capture: &Capture) -> Result<(), crate::Error>;

    /// Number of captures per account, duplicates included
    async fn stats_by_account(&self) -> Result<BTreeMap<String, usize>, crate::Error>;

    /// At most `n` captures, newest first
    async fn recent(&self, n: usize) -> Result<Vec<Capture>, crate::Error>;

    /// Persist any pending appends
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing capture ledgers from configuration
#[async_trait]
pub trait CaptureLedgerFactory: Send + Sync {
    /// Create a CaptureLedger instance from configuration
    async fn create(
        &self,
        config: &LedgerConfig,
    ) -> Result<std::sync::Arc<dyn CaptureLedger>, crate::Error>;
}

/// Sort captures newest first and keep at most `n`
///
/// Captures with equal timestamps keep reverse insertion order, so the
/// last appended comes first.
pub(crate) fn newest_first(captures: &[Capture], n: usize) -> Vec<Capture> {
    let mut out: Vec<Capture> = captures.iter().rev().cloned().collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out.truncate(n);
    out
}

/// Count captures per account
pub(crate) fn count_by_account(captures: &[Capture]) -> BTreeMap<String, usize> {
    let mut stats = BTreeMap::new();
    for capture in captures {
        *stats.entry(capture.account.clone()).or_insert(0) += 1;
    }
    stats
}
