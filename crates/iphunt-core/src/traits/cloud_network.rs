// # Cloud Network Trait
//
// Defines the narrow capability interface the hunt needs from a cloud
// network provider: allocate, list, release and bind public addresses.
//
// ## Implementations
//
// - Simulated: `iphunt-provider-sim` crate
// - Real clouds plug in through `CloudNetworkFactory` + `ProviderRegistry`
//
// ## Usage
//
// ```rust,ignore
// use iphunt_core::CloudNetwork;
//
// async fn grab(network: &dyn CloudNetwork, account: &AccountConfig) -> iphunt_core::Result<()> {
//     let nic = network.find_attachment_point(account, &account.target_resource).await?;
//     let address = network.allocate_public_address(account).await?;
//     network.bind_address(account, &address, &nic).await
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{AccountConfig, ProviderConfig};

/// A public address currently held by an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAddress {
    /// Provider allocation id (used for release and bind)
    pub id: String,
    /// The address value as reported by the provider
    pub address: String,
    /// Id of the attachment point this address is bound to, if any
    pub binding: Option<String>,
}

impl PublicAddress {
    /// Create an unbound address
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            binding: None,
        }
    }

    /// Mark the address as bound to `attachment_id`
    pub fn bound_to(mut self, attachment_id: impl Into<String>) -> Self {
        self.binding = Some(attachment_id.into());
        self
    }

    /// Whether the address is bound to `handle`
    pub fn is_bound_to(&self, handle: &AttachmentHandle) -> bool {
        self.binding.as_deref() == Some(handle.id.as_str())
    }
}

/// The internal network handle of a target resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentHandle {
    /// Provider id of the attachment (network interface, port, ...)
    pub id: String,
    /// The resource the attachment belongs to
    pub resource: String,
}

impl AttachmentHandle {
    pub fn new(id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource: resource.into(),
        }
    }
}

/// Trait for cloud network provider implementations
///
/// Every method performs one provider round trip. Implementations return
/// [`Error::QuotaExceeded`](crate::Error::QuotaExceeded) for provider-side
/// limits, [`Error::Transport`](crate::Error::Transport) for network
/// failures and [`Error::NotFound`](crate::Error::NotFound) when a target
/// resource or its attachment does not exist.
///
/// # Thread Safety
///
/// One instance is shared by all account workers of a hunt, so
/// implementations must be safe to call concurrently for different accounts.
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off internally (owned by the account worker)
/// - ❌ Enforce call timeouts that differ from the worker's (the worker wraps every call)
/// - ❌ Decide whether an address matches (owned by the matcher)
/// - ❌ Write captures (owned by the capture ledger)
#[async_trait]
pub trait CloudNetwork: Send + Sync {
    /// List the public addresses the account currently holds
    async fn list_public_addresses(
        &self,
        account: &AccountConfig,
    ) -> Result<Vec<PublicAddress>, crate::Error>;

    /// Allocate a fresh public address for the account
    async fn allocate_public_address(
        &self,
        account: &AccountConfig,
    ) -> Result<PublicAddress, crate::Error>;

    /// Release an address previously allocated by the account
    async fn release_public_address(
        &self,
        account: &AccountConfig,
        address: &PublicAddress,
    ) -> Result<(), crate::Error>;

    /// Resolve the internal attachment point of `target_resource`
    async fn find_attachment_point(
        &self,
        account: &AccountConfig,
        target_resource: &str,
    ) -> Result<AttachmentHandle, crate::Error>;

    /// Bind `address` to `attachment`
    async fn bind_address(
        &self,
        account: &AccountConfig,
        address: &PublicAddress,
        attachment: &AttachmentHandle,
    ) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing cloud network providers from configuration
pub trait CloudNetworkFactory: Send + Sync {
    /// Create a CloudNetwork instance from configuration
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudNetwork>, crate::Error>;
}
