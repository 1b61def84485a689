//! Account worker
//!
//! Drives one account's allocation loop until a matching address is bound,
//! the hunt is stopped, or the account turns out to be unusable.
//!
//! ## State Machine
//!
//! ```text
//! Initializing ──► Discovering ──► Scanning ──► Allocating ──► Evaluating
//!      │               ▲  ▲            │            │  ▲            │
//!      │               │  └── error ───┼────────────┘  └── miss ────┤
//!      │               └────── bind failed ─────────────────────────┤
//!      ▼                               ▼                            ▼
//!   Failed                           Bound                        Bound
//!
//!   (any sleep or Allocating boundary) ──stop──► Cancelled
//! ```
//!
//! ## Retry Policy
//!
//! - `QuotaExceeded`: long cooldown, back to Discovering, unbounded
//! - Transport errors and timeouts: short cooldown, back to Discovering, unbounded
//! - Miss: release exactly once, jittered pause, back to Allocating
//! - Bind failure: the address is kept (never released), short cooldown,
//!   back to Discovering where the held address is retried
//! - Attachment not found: Failed, siblings unaffected
//! - Any other provider error (malformed response, rejected request): treated
//!   as a transport error
//!
//! ## Unanswered Allocations
//!
//! A timed-out allocate may still have succeeded on the provider. The next
//! successful list is compared with the one taken before that allocate; any
//! new address that is unbound and outside every target range is released.
//! An orphan that only shows up on a later list is not chased, so a provider
//! that keeps answering late can still fill the quota. The worker then loops
//! on QuotaExceeded and the stuck indicator is the only sign.
//!
//! Cancellation is cooperative. A provider call in flight always completes;
//! sleeps are interrupted immediately.

mod snapshot;

pub use snapshot::{WorkerSnapshot, WorkerState};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AccountConfig, BackoffConfig};
use crate::error::{Error, RetryClass};
use crate::events::{BackoffReason, EventSink, HuntEvent};
use crate::matcher::{AddressRange, matching_range};
use crate::traits::{AttachmentHandle, Capture, CaptureLedger, CloudNetwork, PublicAddress};

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// A matching address was bound to the target
    Bound { capture: Capture },
    /// Stop was requested before a capture
    Cancelled,
    /// The account cannot hunt (e.g. target resource missing)
    Failed { error: String },
}

impl WorkerOutcome {
    pub fn state(&self) -> WorkerState {
        match self {
            WorkerOutcome::Bound { .. } => WorkerState::Bound,
            WorkerOutcome::Cancelled => WorkerState::Cancelled,
            WorkerOutcome::Failed { .. } => WorkerState::Failed,
        }
    }
}

/// One account's hunt loop
pub struct AccountWorker {
    account: Arc<AccountConfig>,
    ranges: Arc<[AddressRange]>,
    network: Arc<dyn CloudNetwork>,
    ledger: Arc<dyn CaptureLedger>,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    progress: watch::Sender<WorkerSnapshot>,
    events: EventSink,
}

impl AccountWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        account: Arc<AccountConfig>,
        ranges: Arc<[AddressRange]>,
        network: Arc<dyn CloudNetwork>,
        ledger: Arc<dyn CaptureLedger>,
        backoff: BackoffConfig,
        cancel: CancellationToken,
        progress: watch::Sender<WorkerSnapshot>,
        events: EventSink,
    ) -> Self {
        Self {
            account,
            ranges,
            network,
            ledger,
            backoff,
            cancel,
            progress,
            events,
        }
    }

    /// Run until a terminal state is reached
    ///
    /// After its own capture the worker cancels its token; that token is a
    /// child of the hunt's, so siblings keep hunting.
    pub async fn run(self) -> WorkerOutcome {
        let outcome = self.hunt().await;

        self.transition(outcome.state());
        match &outcome {
            WorkerOutcome::Bound { capture } => {
                info!(
                    "Account {} captured {} (range {})",
                    capture.account, capture.address, capture.range
                );
                self.cancel.cancel();
            }
            WorkerOutcome::Cancelled => {
                info!("Account {} stopped on request", self.account.name);
            }
            WorkerOutcome::Failed { error } => {
                error!("Account {} failed: {}", self.account.name, error);
            }
        }
        self.events.emit(HuntEvent::WorkerFinished {
            account: self.account.name.clone(),
            outcome: outcome.clone(),
        });

        outcome
    }

    async fn hunt(&self) -> WorkerOutcome {
        self.transition(WorkerState::Initializing);
        let attachment = match self.resolve_attachment().await {
            Ok(handle) => handle,
            Err(outcome) => return outcome,
        };

        // Address ids held before an allocate that timed out
        let mut unanswered: Option<HashSet<String>> = None;

        'discover: loop {
            self.transition(WorkerState::Discovering);
            let held = match self
                .call(self.network.list_public_addresses(&self.account))
                .await
            {
                Ok(held) => held,
                Err(e) => {
                    if let Err(outcome) = self.recover("list addresses", e).await {
                        return outcome;
                    }
                    continue 'discover;
                }
            };
            if let Some(before) = unanswered.take() {
                self.release_orphans(&held, &before).await;
            }

            self.transition(WorkerState::Scanning);
            if let Some(capture) = self.scan_held(&held, &attachment).await {
                return WorkerOutcome::Bound { capture };
            }

            loop {
                if self.cancel.is_cancelled() {
                    return WorkerOutcome::Cancelled;
                }

                self.transition(WorkerState::Allocating);
                self.progress.send_modify(|s| s.iterations += 1);
                let address = match self
                    .call(self.network.allocate_public_address(&self.account))
                    .await
                {
                    Ok(address) => address,
                    Err(e) => {
                        if matches!(e, Error::Timeout(_)) {
                            unanswered = Some(held.iter().map(|a| a.id.clone()).collect());
                        }
                        if let Err(outcome) = self.recover("allocate address", e).await {
                            return outcome;
                        }
                        continue 'discover;
                    }
                };
                self.note_allocation(&address);

                self.transition(WorkerState::Evaluating);
                match matching_range(&address.address, &self.ranges) {
                    Some(range) => match self.bind(&address, &attachment).await {
                        Ok(()) => {
                            return WorkerOutcome::Bound {
                                capture: self.capture(&address, range).await,
                            };
                        }
                        Err(_) => {
                            // Kept allocated; Discovering will see it and retry the bind
                            if !self
                                .pause(BackoffReason::Transport, self.backoff.transport_cooldown())
                                .await
                            {
                                return WorkerOutcome::Cancelled;
                            }
                            continue 'discover;
                        }
                    },
                    None => {
                        debug!(
                            "Account {}: {} is outside all target ranges",
                            self.account.name, address.address
                        );
                        self.release(&address).await;
                        if !self.pause(BackoffReason::Jitter, self.backoff.jitter()).await {
                            return WorkerOutcome::Cancelled;
                        }
                    }
                }
            }
        }
    }

    /// Find the target's attachment point, retrying transient failures
    async fn resolve_attachment(&self) -> Result<AttachmentHandle, WorkerOutcome> {
        loop {
            let result = self
                .call(
                    self.network
                        .find_attachment_point(&self.account, &self.account.target_resource),
                )
                .await;

            match result {
                Ok(handle) => {
                    debug!(
                        "Account {}: target {} attaches via {}",
                        self.account.name, self.account.target_resource, handle.id
                    );
                    self.clear_failures();
                    return Ok(handle);
                }
                Err(e) => self.recover("find attachment point", e).await?,
            }
        }
    }

    /// Look for an already-held address that matches
    ///
    /// An address bound to another attachment is left alone; a matching
    /// address whose bind fails is kept for the next pass.
    async fn scan_held(
        &self,
        held: &[PublicAddress],
        attachment: &AttachmentHandle,
    ) -> Option<Capture> {
        for address in held {
            let Some(range) = matching_range(&address.address, &self.ranges) else {
                continue;
            };

            if address.is_bound_to(attachment) {
                info!(
                    "Account {}: held address {} already bound to {}",
                    self.account.name, address.address, attachment.resource
                );
                return Some(self.capture(address, range).await);
            }

            if let Some(other) = &address.binding {
                debug!(
                    "Account {}: held address {} matches but is bound to {}, skipping",
                    self.account.name, address.address, other
                );
                continue;
            }

            if self.bind(address, attachment).await.is_ok() {
                return Some(self.capture(address, range).await);
            }
        }
        None
    }

    async fn bind(&self, address: &PublicAddress, attachment: &AttachmentHandle) -> Result<(), Error> {
        let result = self
            .call(
                self.network
                    .bind_address(&self.account, address, attachment),
            )
            .await;

        if let Err(e) = &result {
            warn!(
                "Account {}: failed to bind matching address {} to {}: {}. Keeping it.",
                self.account.name, address.address, attachment.resource, e
            );
            self.note_failure(e);
            self.events.emit(HuntEvent::BindFailed {
                account: self.account.name.clone(),
                address: address.address.clone(),
                error: e.to_string(),
            });
        }
        result
    }

    /// Release addresses that appeared after an unanswered allocate
    ///
    /// Matching or bound newcomers are left for the scan.
    async fn release_orphans(&self, held: &[PublicAddress], before: &HashSet<String>) {
        for address in held {
            if before.contains(&address.id)
                || address.binding.is_some()
                || matching_range(&address.address, &self.ranges).is_some()
            {
                continue;
            }
            warn!(
                "Account {}: releasing {}, left behind by a timed-out allocate",
                self.account.name, address.address
            );
            self.release(address).await;
        }
    }

    /// Best-effort release; failures are only logged
    async fn release(&self, address: &PublicAddress) {
        match self
            .call(
                self.network
                    .release_public_address(&self.account, address),
            )
            .await
        {
            Ok(()) => {
                self.events.emit(HuntEvent::Released {
                    account: self.account.name.clone(),
                    address: address.address.clone(),
                });
            }
            Err(e) => {
                warn!(
                    "Account {}: failed to release {}: {}",
                    self.account.name, address.address, e
                );
            }
        }
    }

    /// Build and record a capture
    ///
    /// A ledger failure is logged; the capture stands regardless.
    async fn capture(&self, address: &PublicAddress, range: &AddressRange) -> Capture {
        let capture = Capture::new(
            self.account.name.clone(),
            address.address.clone(),
            range.to_string(),
        );

        if let Err(e) = self.ledger.record(&capture).await {
            error!(
                "Account {}: captured {} but failed to record it: {}",
                self.account.name, capture.address, e
            );
        }

        self.events.emit(HuntEvent::Captured {
            capture: capture.clone(),
        });
        capture
    }

    /// Decide between retrying and giving up on a failed provider call
    ///
    /// `Ok(())` means the cooldown elapsed and the caller should retry.
    async fn recover(&self, op: &str, err: Error) -> Result<(), WorkerOutcome> {
        self.note_failure(&err);

        match err.retry_class() {
            RetryClass::Throttled => {
                warn!(
                    "Account {}: {} throttled: {}. Cooling down for {:?}",
                    self.account.name,
                    op,
                    err,
                    self.backoff.quota_cooldown()
                );
                if self
                    .pause(BackoffReason::Quota, self.backoff.quota_cooldown())
                    .await
                {
                    Ok(())
                } else {
                    Err(WorkerOutcome::Cancelled)
                }
            }
            RetryClass::Transport => {
                error!(
                    "Account {}: {} failed: {}. Retrying in {:?}",
                    self.account.name,
                    op,
                    err,
                    self.backoff.transport_cooldown()
                );
                if self
                    .pause(BackoffReason::Transport, self.backoff.transport_cooldown())
                    .await
                {
                    Ok(())
                } else {
                    Err(WorkerOutcome::Cancelled)
                }
            }
            RetryClass::Fatal => Err(WorkerOutcome::Failed {
                error: format!("{} failed: {}", op, err),
            }),
        }
    }

    /// Sleep unless stop is requested first
    ///
    /// Returns `false` when the sleep was cut short by cancellation.
    async fn pause(&self, reason: BackoffReason, delay: Duration) -> bool {
        self.events.emit(HuntEvent::Backoff {
            account: self.account.name.clone(),
            reason,
            delay,
        });

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run a provider call under the configured timeout
    ///
    /// A timeout is retried like a transport error.
    async fn call<T>(&self, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        let limit = self.backoff.call_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{} call timed out after {:?}",
                self.network.provider_name(),
                limit
            ))),
        }
    }

    fn transition(&self, state: WorkerState) {
        let changed = self.progress.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            s.state = state;
            s.last_transition = chrono::Utc::now();
            true
        });

        if changed {
            self.events.emit(HuntEvent::StateChanged {
                account: self.account.name.clone(),
                state,
            });
        }
    }

    fn note_allocation(&self, address: &PublicAddress) {
        debug!(
            "Account {}: allocated {} ({})",
            self.account.name, address.address, address.id
        );
        self.progress.send_modify(|s| {
            s.allocations += 1;
            s.consecutive_failures = 0;
            s.last_progress = chrono::Utc::now();
        });
        self.events.emit(HuntEvent::Allocated {
            account: self.account.name.clone(),
            address: address.address.clone(),
        });
    }

    fn note_failure(&self, err: &Error) {
        let message = err.to_string();
        self.progress.send_modify(|s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.last_error = Some(message);
        });
    }

    fn clear_failures(&self) {
        self.progress.send_modify(|s| s.consecutive_failures = 0);
    }
}
