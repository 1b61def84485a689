//! Hunt orchestration
//!
//! The Hunter is responsible for:
//! - Starting one [`AccountWorker`] per enabled account
//! - Running them concurrently on the tokio runtime
//! - Owning the cancellation token the operator's stop command flips
//! - Joining every worker and reporting how each one ended
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!  HuntConfig ─────────► │    Hunter    │ ◄──── request_stop()
//!                        └──────────────┘
//!                               │ spawn (one task per enabled account)
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//!   ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!   │AccountWorker│      │AccountWorker│      │AccountWorker│
//!   └─────────────┘      └─────────────┘      └─────────────┘
//!          │                    │                    │
//!          └──────────┬─────────┴──────────┬─────────┘
//!                     ▼                    ▼
//!              ┌─────────────┐      ┌──────────────┐
//!              │CloudNetwork │      │CaptureLedger │
//!              └─────────────┘      └──────────────┘
//! ```
//!
//! One account's capture never stops its siblings: each account hunts for
//! its own target resource. Only an explicit stop ends the whole hunt early.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{AccountConfig, BackoffConfig};
use crate::error::{Error, Result};
use crate::events::{EventSink, HuntEvent};
use crate::matcher::AddressRange;
use crate::traits::{Capture, CaptureLedger, CloudNetwork};
use crate::worker::{AccountWorker, WorkerOutcome, WorkerSnapshot};

/// How many captures `HunterHandle::status` includes
const STATUS_RECENT_CAPTURES: usize = 10;

/// Final result of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub account: String,
    #[serde(flatten)]
    pub outcome: WorkerOutcome,
}

/// Result of a completed hunt, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntReport {
    pub workers: Vec<WorkerReport>,
}

impl HuntReport {
    /// Captures made during this hunt
    pub fn captures(&self) -> Vec<&Capture> {
        self.workers
            .iter()
            .filter_map(|w| match &w.outcome {
                WorkerOutcome::Bound { capture } => Some(capture),
                _ => None,
            })
            .collect()
    }

    /// Workers that ended with an error
    pub fn failures(&self) -> Vec<&WorkerReport> {
        self.workers
            .iter()
            .filter(|w| matches!(w.outcome, WorkerOutcome::Failed { .. }))
            .collect()
    }

    /// Outcome for one account
    pub fn outcome(&self, account: &str) -> Option<&WorkerOutcome> {
        self.workers
            .iter()
            .find(|w| w.account == account)
            .map(|w| &w.outcome)
    }

    fn count_cancelled(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.outcome == WorkerOutcome::Cancelled)
            .count()
    }
}

/// One worker's live status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub snapshot: WorkerSnapshot,
    /// No successful allocation for longer than `stuck_after_secs`
    pub stuck: bool,
}

/// Operator-visible status of a hunter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuntStatus {
    pub running: bool,
    pub stop_requested: bool,
    pub workers: Vec<WorkerStatus>,
    pub captures_by_account: BTreeMap<String, usize>,
    pub recent_captures: Vec<Capture>,
}

/// State shared between a hunter and its handles
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    workers: Mutex<Vec<watch::Receiver<WorkerSnapshot>>>,
}

impl Shared {
    fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|rx| rx.borrow().clone())
            .collect()
    }
}

/// Clears the running flag when a hunt ends, even if `run` is dropped
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Concurrent hunt orchestrator
///
/// ## Lifecycle
///
/// 1. Create with [`Hunter::new()`]
/// 2. Optionally take a [`HunterHandle`] for the control surface
/// 3. Call [`Hunter::run()`]; it returns once every worker is terminal
///
/// A hunter whose stop was requested stays stopped; build a new one for
/// the next hunt.
pub struct Hunter {
    network: Arc<dyn CloudNetwork>,
    ledger: Arc<dyn CaptureLedger>,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    events: EventSink,
}

impl Hunter {
    /// Create a new hunter
    ///
    /// # Returns
    ///
    /// A tuple of (hunter, event_receiver) where event_receiver yields hunt events
    pub fn new(
        network: Arc<dyn CloudNetwork>,
        ledger: Arc<dyn CaptureLedger>,
        backoff: BackoffConfig,
    ) -> Result<(Self, mpsc::Receiver<HuntEvent>)> {
        backoff.validate()?;

        let (events, rx) = EventSink::channel(backoff.event_channel_capacity);
        let hunter = Self {
            network,
            ledger,
            backoff,
            cancel: CancellationToken::new(),
            shared: Arc::new(Shared::default()),
            events,
        };

        Ok((hunter, rx))
    }

    /// Run one worker per enabled account until all are terminal
    ///
    /// # Returns
    ///
    /// - `Ok(HuntReport)`: every worker reached Bound, Cancelled or Failed
    /// - `Err(Error)`: the hunt could not start (nothing to hunt with, or
    ///   a hunt is already running on this hunter)
    pub async fn run(
        &self,
        accounts: &[AccountConfig],
        ranges: &[AddressRange],
    ) -> Result<HuntReport> {
        let enabled: Vec<Arc<AccountConfig>> = accounts
            .iter()
            .filter(|a| a.enabled)
            .cloned()
            .map(Arc::new)
            .collect();

        if enabled.is_empty() {
            return Err(Error::config("No enabled accounts to hunt with"));
        }
        if ranges.is_empty() {
            return Err(Error::config("No target ranges to hunt for"));
        }
        let mut seen = HashSet::with_capacity(enabled.len());
        if let Some(dup) = enabled.iter().find(|a| !seen.insert(a.name.as_str())) {
            return Err(Error::config(format!(
                "Account {} is configured more than once",
                dup.name
            )));
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::config("A hunt is already running"));
        }
        let _running = RunningGuard(&self.shared.running);

        let ranges: Arc<[AddressRange]> = Arc::from(ranges);
        info!(
            "Starting hunt: {} account(s), {} range(s), provider {}",
            enabled.len(),
            ranges.len(),
            self.network.provider_name()
        );
        self.events.emit(HuntEvent::Started {
            workers: enabled.len(),
        });

        let mut receivers = Vec::with_capacity(enabled.len());
        let mut tasks = JoinSet::new();
        for (index, account) in enabled.iter().enumerate() {
            let (progress_tx, progress_rx) =
                watch::channel(WorkerSnapshot::new(account.name.clone()));
            receivers.push(progress_rx);

            let worker = AccountWorker::new(
                Arc::clone(account),
                Arc::clone(&ranges),
                Arc::clone(&self.network),
                Arc::clone(&self.ledger),
                self.backoff.clone(),
                self.cancel.child_token(),
                progress_tx,
                self.events.clone(),
            );
            tasks.spawn(async move { (index, worker.run().await) });
        }
        *self
            .shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = receivers;

        let mut outcomes: Vec<Option<WorkerOutcome>> = vec![None; enabled.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    debug!(
                        "Worker {} finished: {:?}",
                        enabled[index].name,
                        outcome.state()
                    );
                    outcomes[index] = Some(outcome);
                }
                Err(e) => {
                    error!("Worker task aborted: {}", e);
                }
            }
        }

        // A worker whose task panicked has no entry; report it as failed
        let report = HuntReport {
            workers: enabled
                .iter()
                .zip(outcomes)
                .map(|(account, outcome)| WorkerReport {
                    account: account.name.clone(),
                    outcome: outcome.unwrap_or_else(|| {
                        WorkerOutcome::Failed {
                            error: "worker task aborted".to_string(),
                        }
                    }),
                })
                .collect(),
        };

        if let Err(e) = self.ledger.flush().await {
            error!("Failed to flush capture ledger: {}", e);
        }

        let captured = report.captures().len();
        let cancelled = report.count_cancelled();
        let failed = report.failures().len();
        info!(
            "Hunt finished: {} captured, {} cancelled, {} failed",
            captured, cancelled, failed
        );
        self.events.emit(HuntEvent::Finished {
            captured,
            cancelled,
            failed,
        });

        Ok(report)
    }

    /// Ask every worker to stop
    ///
    /// Workers observe the request at their next allocate boundary or
    /// immediately if sleeping; a provider call in flight completes first.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Get a cloneable handle for stop/status from other tasks
    pub fn handle(&self) -> HunterHandle {
        HunterHandle {
            cancel: self.cancel.clone(),
            shared: Arc::clone(&self.shared),
            ledger: Arc::clone(&self.ledger),
            stuck_after: self.backoff.stuck_after(),
        }
    }
}

/// Control handle for a running [`Hunter`]
#[derive(Clone)]
pub struct HunterHandle {
    cancel: CancellationToken,
    shared: Arc<Shared>,
    ledger: Arc<dyn CaptureLedger>,
    stuck_after: Duration,
}

impl HunterHandle {
    /// Ask every worker to stop (same as [`Hunter::request_stop`])
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Whether stop has been requested
    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether `run` is in progress
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Resolves once stop has been requested
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Current worker snapshots
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.shared.snapshots()
    }

    /// Worker progress plus ledger statistics
    pub async fn status(&self) -> Result<HuntStatus> {
        let now = Utc::now();
        let workers = self
            .shared
            .snapshots()
            .into_iter()
            .map(|snapshot| WorkerStatus {
                stuck: snapshot.is_stuck(self.stuck_after, now),
                snapshot,
            })
            .collect();

        Ok(HuntStatus {
            running: self.is_running(),
            stop_requested: self.is_stop_requested(),
            workers,
            captures_by_account: self.ledger.stats_by_account().await?,
            recent_captures: self.ledger.recent(STATUS_RECENT_CAPTURES).await?,
        })
    }
}
