//! Test doubles and common utilities for hunt contract tests
//!
//! `ScriptedNetwork` behaves like a tiny provider: it tracks which addresses
//! each account holds, hands out allocations from a per-account script and
//! records every call so tests can assert on ordering.

#![allow(dead_code)]

use async_trait::async_trait;
use iphunt_core::error::{Error, Result};
use iphunt_core::traits::{
    AttachmentHandle, Capture, CaptureLedger, CloudNetwork, PublicAddress,
};
use iphunt_core::{AccountConfig, BackoffConfig, HuntEvent};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted answer to `allocate_public_address`
#[derive(Debug, Clone)]
pub enum AllocStep {
    /// Allocate this address
    Address(&'static str),
    /// Fail with QuotaExceeded
    Quota,
    /// Fail with a transport error
    Transport,
    /// Sleep before allocating this address (for timeout tests)
    Slow(Duration, &'static str),
    /// Allocate this address at once, then answer only after the delay
    Late(Duration, &'static str),
    /// Answer with an unparseable body
    Malformed,
}

/// A provider call, as recorded by `ScriptedNetwork`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindAttachment { account: String },
    List { account: String },
    Allocate { account: String },
    Release { account: String, address: String },
    Bind { account: String, address: String },
}

impl Call {
    pub fn account(&self) -> &str {
        match self {
            Call::FindAttachment { account }
            | Call::List { account }
            | Call::Allocate { account }
            | Call::Release { account, .. }
            | Call::Bind { account, .. } => account,
        }
    }
}

/// A scripted in-memory provider
#[derive(Default)]
pub struct ScriptedNetwork {
    targets: HashSet<String>,
    held: Mutex<HashMap<String, Vec<PublicAddress>>>,
    scripts: Mutex<HashMap<String, VecDeque<AllocStep>>>,
    calls: Mutex<Vec<Call>>,
    bind_failures: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `resource` resolvable by `find_attachment_point`
    pub fn with_target(mut self, resource: &str) -> Self {
        self.targets.insert(resource.to_string());
        self
    }

    /// Addresses the account already holds before the hunt starts
    pub fn with_held(self, account: &str, addresses: Vec<PublicAddress>) -> Self {
        self.held
            .lock()
            .unwrap()
            .insert(account.to_string(), addresses);
        self
    }

    /// Allocation answers for `account`, consumed in order
    ///
    /// Once the script is exhausted every allocation returns a fresh
    /// address from 192.0.2.0/24, which tests never target.
    pub fn with_script(self, account: &str, steps: Vec<AllocStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(account.to_string(), steps.into());
        self
    }

    /// Fail the next `n` bind calls
    pub fn failing_binds(self, n: usize) -> Self {
        self.bind_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, account: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.account() == account)
            .collect()
    }

    pub fn count(&self, account: &str, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls_for(account).iter().filter(|c| pred(c)).count()
    }

    pub fn allocations(&self, account: &str) -> usize {
        self.count(account, |c| matches!(c, Call::Allocate { .. }))
    }

    pub fn held(&self, account: &str) -> Vec<PublicAddress> {
        self.held
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn fresh_id(&self) -> String {
        format!("eip-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn hold(&self, account: &str, address: &str) -> PublicAddress {
        let allocated = PublicAddress::new(self.fresh_id(), address);
        self.held
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_default()
            .push(allocated.clone());
        allocated
    }
}

#[async_trait]
impl CloudNetwork for ScriptedNetwork {
    async fn list_public_addresses(&self, account: &AccountConfig) -> Result<Vec<PublicAddress>> {
        self.log(Call::List {
            account: account.name.clone(),
        });
        Ok(self.held(&account.name))
    }

    async fn allocate_public_address(&self, account: &AccountConfig) -> Result<PublicAddress> {
        self.log(Call::Allocate {
            account: account.name.clone(),
        });

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&account.name)
            .and_then(|script| script.pop_front());

        match step {
            Some(AllocStep::Address(address)) => Ok(self.hold(&account.name, address)),
            Some(AllocStep::Quota) => Err(Error::quota_exceeded("address limit reached")),
            Some(AllocStep::Transport) => Err(Error::transport("connection reset")),
            Some(AllocStep::Slow(delay, address)) => {
                tokio::time::sleep(delay).await;
                Ok(self.hold(&account.name, address))
            }
            Some(AllocStep::Late(delay, address)) => {
                let allocated = self.hold(&account.name, address);
                tokio::time::sleep(delay).await;
                Ok(allocated)
            }
            Some(AllocStep::Malformed) => {
                Err(serde_json::from_str::<PublicAddress>("<html>502</html>")
                    .unwrap_err()
                    .into())
            }
            None => {
                let n = self.next_id.load(Ordering::SeqCst) % 250 + 1;
                Ok(self.hold(&account.name, &format!("192.0.2.{}", n)))
            }
        }
    }

    async fn release_public_address(
        &self,
        account: &AccountConfig,
        address: &PublicAddress,
    ) -> Result<()> {
        self.log(Call::Release {
            account: account.name.clone(),
            address: address.address.clone(),
        });
        if let Some(list) = self.held.lock().unwrap().get_mut(&account.name) {
            list.retain(|a| a.id != address.id);
        }
        Ok(())
    }

    async fn find_attachment_point(
        &self,
        account: &AccountConfig,
        target_resource: &str,
    ) -> Result<AttachmentHandle> {
        self.log(Call::FindAttachment {
            account: account.name.clone(),
        });
        if self.targets.contains(target_resource) {
            Ok(AttachmentHandle::new(
                format!("nic-{}", target_resource),
                target_resource,
            ))
        } else {
            Err(Error::not_found(format!(
                "instance {} does not exist",
                target_resource
            )))
        }
    }

    async fn bind_address(
        &self,
        account: &AccountConfig,
        address: &PublicAddress,
        attachment: &AttachmentHandle,
    ) -> Result<()> {
        self.log(Call::Bind {
            account: account.name.clone(),
            address: address.address.clone(),
        });

        let remaining = self.bind_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.bind_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::bind("interface busy"));
        }

        if let Some(list) = self.held.lock().unwrap().get_mut(&account.name) {
            for held in list.iter_mut().filter(|a| a.id == address.id) {
                held.binding = Some(attachment.id.clone());
            }
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// A ledger whose writes always fail
#[derive(Default)]
pub struct FailingLedger {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl CaptureLedger for FailingLedger {
    async fn record(&self, _capture: &Capture) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::ledger("disk full"))
    }

    async fn stats_by_account(&self) -> Result<BTreeMap<String, usize>> {
        Ok(BTreeMap::new())
    }

    async fn recent(&self, _n: usize) -> Result<Vec<Capture>> {
        Ok(Vec::new())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Backoff schedule short enough for tests
pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        quota_cooldown_ms: 40,
        transport_cooldown_ms: 10,
        jitter_min_ms: 1,
        jitter_max_ms: 3,
        call_timeout_ms: 1_000,
        stuck_after_secs: 900,
        event_channel_capacity: 10_000,
    }
}

pub fn account(name: &str, target: &str) -> AccountConfig {
    AccountConfig::new(name, target).with_credential("token", format!("{}-token", name))
}

pub fn ranges(specs: &[&str]) -> Vec<iphunt_core::AddressRange> {
    specs.iter().map(|s| s.parse().unwrap()).collect()
}

/// Collect every event still buffered in the channel
pub fn drain(rx: &mut mpsc::Receiver<HuntEvent>) -> Vec<HuntEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
