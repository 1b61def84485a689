//! Hunt events
//!
//! Events are emitted on a bounded channel for monitoring and tests. When
//! the channel is full the event is dropped with a warning: a slow consumer
//! must never stall an account worker.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::traits::Capture;
use crate::worker::{WorkerOutcome, WorkerState};

/// Why a worker is sleeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffReason {
    /// Provider quota or throttling (long cooldown)
    Quota,
    /// Transport failure, timeout or failed bind (short cooldown)
    Transport,
    /// Randomized pause after releasing a non-matching address
    Jitter,
}

/// Events emitted while a hunt runs
#[derive(Debug, Clone, PartialEq)]
pub enum HuntEvent {
    /// Hunt started
    Started {
        workers: usize,
    },

    /// A worker entered a new state
    StateChanged {
        account: String,
        state: WorkerState,
    },

    /// A fresh address was allocated
    Allocated {
        account: String,
        address: String,
    },

    /// A non-matching address was released
    Released {
        account: String,
        address: String,
    },

    /// A worker is about to sleep
    Backoff {
        account: String,
        reason: BackoffReason,
        delay: Duration,
    },

    /// Binding a matching address failed; the address is kept
    BindFailed {
        account: String,
        address: String,
        error: String,
    },

    /// An address was acquired and bound
    Captured {
        capture: Capture,
    },

    /// A worker reached a terminal state
    WorkerFinished {
        account: String,
        outcome: WorkerOutcome,
    },

    /// Every worker has finished
    Finished {
        captured: usize,
        cancelled: usize,
        failed: usize,
    },
}

/// Sending side of the event channel
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<HuntEvent>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<HuntEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: HuntEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Event receiver dropped, event discarded");
            }
        }
    }
}
