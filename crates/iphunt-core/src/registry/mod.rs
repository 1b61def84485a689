//! Plugin-based provider registry
//!
//! The registry allows cloud network providers and capture ledgers to be
//! registered dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use iphunt_core::registry::ProviderRegistry;
//!
//! let registry = ProviderRegistry::with_builtin_ledgers();
//!
//! // In iphunt-provider-sim
//! iphunt_provider_sim::register(&registry);
//!
//! let network = registry.create_network(&config.provider)?;
//! let ledger = registry.create_ledger(&LedgerConfig::Memory).await?;
//! ```

use crate::config::{LedgerConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::ledger::{FileLedgerFactory, MemoryLedgerFactory};
use crate::traits::{CaptureLedger, CaptureLedgerFactory, CloudNetwork, CloudNetworkFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Provider registry for plugin-based component creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered cloud network factories
    networks: RwLock<HashMap<String, Arc<dyn CloudNetworkFactory>>>,

    /// Registered capture ledger factories
    ledgers: RwLock<HashMap<String, Arc<dyn CaptureLedgerFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `file` and `memory` ledgers registered
    pub fn with_builtin_ledgers() -> Self {
        let registry = Self::new();
        registry.register_ledger("file", Box::new(FileLedgerFactory));
        registry.register_ledger("memory", Box::new(MemoryLedgerFactory));
        registry
    }

    /// Register a cloud network factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "simulated")
    /// - `factory`: Factory object for creating provider instances
    pub fn register_network(&self, name: impl Into<String>, factory: Box<dyn CloudNetworkFactory>) {
        let mut networks = self.networks.write().unwrap_or_else(PoisonError::into_inner);
        networks.insert(name.into(), Arc::from(factory));
    }

    /// Register a capture ledger factory
    pub fn register_ledger(&self, name: impl Into<String>, factory: Box<dyn CaptureLedgerFactory>) {
        let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
        ledgers.insert(name.into(), Arc::from(factory));
    }

    /// Create a cloud network provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn CloudNetwork>)`: Created provider instance
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_network(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudNetwork>> {
        let provider_type = config.type_name();
        let factory = self
            .networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// Create a capture ledger from configuration
    pub async fn create_ledger(&self, config: &LedgerConfig) -> Result<Arc<dyn CaptureLedger>> {
        let ledger_type = config.type_name();

        // Release the lock before calling async create
        let factory = self
            .ledgers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ledger_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown ledger type: {}", ledger_type)))?;

        factory.create(config).await
    }

    /// List all registered provider types
    pub fn list_networks(&self) -> Vec<String> {
        let networks = self.networks.read().unwrap_or_else(PoisonError::into_inner);
        networks.keys().cloned().collect()
    }

    /// List all registered ledger types
    pub fn list_ledgers(&self) -> Vec<String> {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        ledgers.keys().cloned().collect()
    }

    /// Check if a provider type is registered
    pub fn has_network(&self, name: &str) -> bool {
        let networks = self.networks.read().unwrap_or_else(PoisonError::into_inner);
        networks.contains_key(name)
    }

    /// Check if a ledger type is registered
    pub fn has_ledger(&self, name: &str) -> bool {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        ledgers.contains_key(name)
    }
}
