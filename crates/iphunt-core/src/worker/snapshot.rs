//! Worker progress snapshots
//!
//! Retries are unbounded, so a worker that keeps hitting quota or transport
//! errors would otherwise spin silently. Each worker publishes a snapshot
//! through a `watch` channel; the hunter turns it into a stuck indicator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// States of an account worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Resolving the target's attachment point
    Initializing,
    /// Listing addresses the account already holds
    Discovering,
    /// Matching held addresses against the target ranges
    Scanning,
    /// Requesting a fresh address
    Allocating,
    /// Matching a freshly allocated address
    Evaluating,
    /// A matching address is bound to the target (terminal)
    Bound,
    /// Stop was requested (terminal)
    Cancelled,
    /// Unrecoverable error for this account (terminal)
    Failed,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Bound | WorkerState::Cancelled | WorkerState::Failed
        )
    }
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Account the worker hunts for
    pub account: String,
    /// Current state
    pub state: WorkerState,
    /// Allocate attempts so far
    pub iterations: u64,
    /// Successful allocations so far
    pub allocations: u64,
    /// Provider failures since the last successful call
    pub consecutive_failures: u32,
    /// Last error seen, if any
    pub last_error: Option<String>,
    /// When the worker last changed state
    pub last_transition: DateTime<Utc>,
    /// When the worker last made progress (start or successful allocation)
    pub last_progress: DateTime<Utc>,
}

impl WorkerSnapshot {
    pub fn new(account: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            account: account.into(),
            state: WorkerState::Initializing,
            iterations: 0,
            allocations: 0,
            consecutive_failures: 0,
            last_error: None,
            last_transition: now,
            last_progress: now,
        }
    }

    /// A running worker that has not allocated anything for `threshold`
    pub fn is_stuck(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let idle = now.signed_duration_since(self.last_progress);
        match chrono::Duration::from_std(threshold) {
            Ok(limit) => idle > limit,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_only_when_running_and_idle() {
        let mut snapshot = WorkerSnapshot::new("acc");
        let later = snapshot.last_progress + chrono::Duration::seconds(120);

        assert!(snapshot.is_stuck(Duration::from_secs(60), later));
        assert!(!snapshot.is_stuck(Duration::from_secs(600), later));

        snapshot.state = WorkerState::Bound;
        assert!(!snapshot.is_stuck(Duration::from_secs(60), later));
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkerState::Initializing).unwrap(),
            "\"initializing\""
        );
        assert!(WorkerState::Cancelled.is_terminal());
        assert!(!WorkerState::Evaluating.is_terminal());
    }
}
