// # Memory Capture Ledger
//
// In-memory implementation of CaptureLedger.
//
// ## Crash Behavior
//
// - All captures are lost on restart/crash
// - The captured addresses themselves stay bound at the provider
//
// ## When to Use
//
// - Testing environments
// - Embedding where the host application persists captures itself

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::LedgerConfig;
use crate::traits::capture_ledger::{
    Capture, CaptureLedger, CaptureLedgerFactory, count_by_account, newest_first,
};

/// In-memory capture ledger
///
/// # Example
///
/// ```rust,no_run
/// use iphunt_core::ledger::MemoryLedger;
/// use iphunt_core::traits::{Capture, CaptureLedger};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ledger = MemoryLedger::new();
///     ledger.record(&Capture::new("acc-1", "203.0.113.55", "203.0.113.0/24")).await?;
///
///     let stats = ledger.stats_by_account().await?;
///     assert_eq!(stats["acc-1"], 1);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<RwLock<Vec<Capture>>>,
}

impl MemoryLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captures recorded
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the ledger is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// All captures in append order
    pub async fn all(&self) -> Vec<Capture> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl CaptureLedger for MemoryLedger {
    async fn record(&self, capture: &Capture) -> Result<(), Error> {
        self.inner.write().await.push(capture.clone());
        Ok(())
    }

    async fn stats_by_account(&self) -> Result<BTreeMap<String, usize>, Error> {
        let guard = self.inner.read().await;
        Ok(count_by_account(&guard))
    }

    async fn recent(&self, n: usize) -> Result<Vec<Capture>, Error> {
        let guard = self.inner.read().await;
        Ok(newest_first(&guard, n))
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for [`MemoryLedger`]
pub struct MemoryLedgerFactory;

#[async_trait]
impl CaptureLedgerFactory for MemoryLedgerFactory {
    async fn create(&self, config: &LedgerConfig) -> Result<Arc<dyn CaptureLedger>, Error> {
        match config {
            LedgerConfig::Memory => Ok(Arc::new(MemoryLedger::new())),
            other => Err(Error::config(format!(
                "Memory ledger factory cannot build a '{}' ledger",
                other.type_name()
            ))),
        }
    }
}
