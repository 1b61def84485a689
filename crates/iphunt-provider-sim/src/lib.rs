// # Simulated Cloud Network Provider
//
// An in-process stand-in for a real cloud's public address API, used for
// demos, local runs of the daemon and integration tests.
//
// ## Behavior
//
// - Allocations are drawn uniformly at random from the configured pools
// - Each account may hold at most `max_addresses` addresses; allocating
//   beyond that fails with `QuotaExceeded`, like a real account limit
// - Every call sleeps `latency_ms` and fails with a transport error with
//   probability `failure_rate`
// - Target resources listed in `instances` exist; an empty list means any
//   target exists
//
// The provider never retries, backs off or spawns tasks. All of that is
// owned by the worker driving it.

use async_trait::async_trait;
use iphunt_core::config::{AccountConfig, ProviderConfig};
use iphunt_core::traits::{AttachmentHandle, CloudNetwork, CloudNetworkFactory, PublicAddress};
use iphunt_core::{Error, ProviderRegistry, Result};
use ipnet::IpNet;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Simulated provider
pub struct SimulatedNetwork {
    pools: Vec<IpNet>,
    max_addresses: usize,
    latency: Duration,
    failure_rate: f64,
    instances: HashSet<String>,

    /// Addresses held, per account name
    held: Mutex<HashMap<String, Vec<PublicAddress>>>,

    next_id: AtomicU64,
}

impl SimulatedNetwork {
    /// Create a simulated provider allocating from `pools`
    pub fn new(pools: Vec<IpNet>, max_addresses: usize) -> Self {
        Self {
            pools,
            max_addresses,
            latency: Duration::ZERO,
            failure_rate: 0.0,
            instances: HashSet::new(),
            held: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build from a `simulated` provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let ProviderConfig::Simulated {
            pools,
            max_addresses,
            latency_ms,
            failure_rate,
            instances,
        } = config
        else {
            return Err(Error::config("Invalid config for simulated provider"));
        };
        config.validate()?;

        let pools = pools
            .iter()
            .map(|p| {
                p.parse::<IpNet>()
                    .map(|net| net.trunc())
                    .map_err(|e| Error::config(format!("Invalid pool '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(pools, *max_addresses)
            .with_latency(Duration::from_millis(*latency_ms))
            .with_failure_rate(*failure_rate)
            .with_instances(instances.iter().cloned()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    /// Restrict which target resources exist
    pub fn with_instances(mut self, instances: impl IntoIterator<Item = String>) -> Self {
        self.instances = instances.into_iter().collect();
        self
    }

    /// Addresses currently held by `account`
    pub fn held_by(&self, account: &str) -> Vec<PublicAddress> {
        self.lock_held().get(account).cloned().unwrap_or_default()
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<PublicAddress>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply latency and the configured failure rate
    async fn round_trip(&self, op: &str) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(Error::transport(format!("simulated {} failure", op)));
        }
        Ok(())
    }

    fn random_address(&self) -> Result<IpAddr> {
        let mut rng = rand::thread_rng();
        let pool = self
            .pools
            .get(rng.gen_range(0..self.pools.len().max(1)))
            .ok_or_else(|| Error::config("Simulated provider has no pools"))?;

        let address = match pool {
            IpNet::V4(net) => {
                let base = u32::from(net.network());
                let span = u32::from(net.hostmask());
                IpAddr::V4(Ipv4Addr::from(base | rng.gen_range(0..=span)))
            }
            IpNet::V6(net) => {
                let base = u128::from(net.network());
                let span = u128::from(net.hostmask());
                IpAddr::V6(Ipv6Addr::from(base | rng.gen_range(0..=span)))
            }
        };
        Ok(address)
    }
}

#[async_trait]
impl CloudNetwork for SimulatedNetwork {
    async fn list_public_addresses(&self, account: &AccountConfig) -> Result<Vec<PublicAddress>> {
        self.round_trip("list").await?;
        Ok(self.held_by(&account.name))
    }

    async fn allocate_public_address(&self, account: &AccountConfig) -> Result<PublicAddress> {
        self.round_trip("allocate").await?;

        let ip = self.random_address()?;
        let mut held = self.lock_held();
        let owned = held.entry(account.name.clone()).or_default();
        if owned.len() >= self.max_addresses {
            return Err(Error::quota_exceeded(format!(
                "account {} already holds {} address(es)",
                account.name,
                owned.len()
            )));
        }

        let id = format!("eipalloc-{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let address = PublicAddress::new(id, ip.to_string());
        owned.push(address.clone());

        tracing::trace!("Simulated allocate for {}: {}", account.name, address.address);
        Ok(address)
    }

    async fn release_public_address(
        &self,
        account: &AccountConfig,
        address: &PublicAddress,
    ) -> Result<()> {
        self.round_trip("release").await?;

        let mut held = self.lock_held();
        let owned = held.entry(account.name.clone()).or_default();
        let before = owned.len();
        owned.retain(|a| a.id != address.id);
        if owned.len() == before {
            return Err(Error::not_found(format!(
                "allocation {} is not held by {}",
                address.id, account.name
            )));
        }
        Ok(())
    }

    async fn find_attachment_point(
        &self,
        _account: &AccountConfig,
        target_resource: &str,
    ) -> Result<AttachmentHandle> {
        self.round_trip("describe").await?;

        if target_resource.is_empty()
            || (!self.instances.is_empty() && !self.instances.contains(target_resource))
        {
            return Err(Error::not_found(format!(
                "instance {} does not exist",
                target_resource
            )));
        }
        Ok(AttachmentHandle::new(
            format!("eni-{}", target_resource),
            target_resource,
        ))
    }

    async fn bind_address(
        &self,
        account: &AccountConfig,
        address: &PublicAddress,
        attachment: &AttachmentHandle,
    ) -> Result<()> {
        self.round_trip("associate").await?;

        let mut held = self.lock_held();
        let held_address = held
            .get_mut(&account.name)
            .and_then(|owned| owned.iter_mut().find(|a| a.id == address.id))
            .ok_or_else(|| {
                Error::bind(format!(
                    "allocation {} is not held by {}",
                    address.id, account.name
                ))
            })?;
        held_address.binding = Some(attachment.id.clone());
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "simulated"
    }
}

/// Factory for creating simulated providers
pub struct SimulatedNetworkFactory;

impl CloudNetworkFactory for SimulatedNetworkFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudNetwork>> {
        let network = SimulatedNetwork::from_config(config)?;
        tracing::info!(
            "Simulated provider ready: {} pool(s), {} address(es) per account",
            network.pools.len(),
            network.max_addresses
        );
        Ok(Arc::new(network))
    }
}

/// Register the simulated provider with a registry
///
/// # Example
///
/// ```rust
/// use iphunt_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// iphunt_provider_sim::register(&registry);
/// assert!(registry.has_network("simulated"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_network("simulated", Box::new(SimulatedNetworkFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use iphunt_core::{BackoffConfig, Hunter, MemoryLedger, WorkerOutcome};
    use tokio_test::{assert_err, assert_ok};

    fn pool(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn account() -> AccountConfig {
        AccountConfig::new("acc-1", "i-0abc")
    }

    #[tokio::test]
    async fn allocations_come_from_pools() {
        let network = SimulatedNetwork::new(vec![pool("203.0.113.0/28")], 100);
        for _ in 0..50 {
            let address = assert_ok!(network.allocate_public_address(&account()).await);
            let ip: IpAddr = address.address.parse().unwrap();
            assert!(pool("203.0.113.0/28").contains(&ip), "{} outside pool", ip);
        }
        assert_eq!(network.held_by("acc-1").len(), 50);
    }

    #[tokio::test]
    async fn ipv6_pools_are_supported() {
        let network = SimulatedNetwork::new(vec![pool("2001:db8::/120")], 1);
        let address = assert_ok!(network.allocate_public_address(&account()).await);
        let ip: IpAddr = address.address.parse().unwrap();
        assert!(ip.is_ipv6());
    }

    #[tokio::test]
    async fn quota_is_enforced_until_release() {
        let network = SimulatedNetwork::new(vec![pool("198.51.100.0/24")], 2);
        let first = assert_ok!(network.allocate_public_address(&account()).await);
        assert_ok!(network.allocate_public_address(&account()).await);

        let err = assert_err!(network.allocate_public_address(&account()).await);
        assert!(matches!(err, Error::QuotaExceeded(_)));

        assert_ok!(network.release_public_address(&account(), &first).await);
        assert_ok!(network.allocate_public_address(&account()).await);

        // Quotas are per account
        let other = AccountConfig::new("acc-2", "i-0abc");
        assert_ok!(network.allocate_public_address(&other).await);
    }

    #[tokio::test]
    async fn release_of_unknown_allocation_fails() {
        let network = SimulatedNetwork::new(vec![pool("198.51.100.0/24")], 2);
        let stray = PublicAddress::new("eipalloc-ffffffff", "198.51.100.1");
        let err = assert_err!(network.release_public_address(&account(), &stray).await);
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn bind_marks_address_as_attached() {
        let network = SimulatedNetwork::new(vec![pool("198.51.100.0/24")], 2);
        let handle = assert_ok!(network.find_attachment_point(&account(), "i-0abc").await);
        let address = assert_ok!(network.allocate_public_address(&account()).await);

        assert_ok!(network.bind_address(&account(), &address, &handle).await);

        let listed = assert_ok!(network.list_public_addresses(&account()).await);
        assert!(listed[0].is_bound_to(&handle));
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let network = SimulatedNetwork::new(vec![pool("198.51.100.0/24")], 2)
            .with_instances(vec!["i-known".to_string()]);

        assert_ok!(network.find_attachment_point(&account(), "i-known").await);
        let err = assert_err!(network.find_attachment_point(&account(), "i-0abc").await);
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn full_failure_rate_is_transport_error() {
        let network =
            SimulatedNetwork::new(vec![pool("198.51.100.0/24")], 2).with_failure_rate(1.0);
        let err = assert_err!(network.list_public_addresses(&account()).await);
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn factory_reads_json_config() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "type": "simulated",
            "pools": ["203.0.113.0/24"],
            "max_addresses": 3,
            "instances": ["i-0abc"]
        }))
        .unwrap();

        let registry = ProviderRegistry::new();
        register(&registry);
        let network = assert_ok!(registry.create_network(&config));
        assert_eq!(network.provider_name(), "simulated");
    }

    #[test]
    fn factory_rejects_bad_pool() {
        let config = ProviderConfig::Simulated {
            pools: vec!["not-a-prefix".to_string()],
            max_addresses: 3,
            latency_ms: 0,
            failure_rate: 0.0,
            instances: Vec::new(),
        };
        assert!(matches!(
            SimulatedNetworkFactory.create(&config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn hunt_against_simulator_binds() {
        // Half the pool space matches, so a capture comes quickly
        let network = Arc::new(SimulatedNetwork::new(
            vec![pool("198.51.100.0/24"), pool("203.0.113.0/24")],
            2,
        ));
        let backoff = BackoffConfig {
            quota_cooldown_ms: 5,
            transport_cooldown_ms: 5,
            jitter_min_ms: 0,
            jitter_max_ms: 1,
            ..BackoffConfig::default()
        };
        let (hunter, _events) =
            Hunter::new(network.clone(), Arc::new(MemoryLedger::new()), backoff).unwrap();

        let report = hunter
            .run(&[account()], &["203.0.113.0/24".parse().unwrap()])
            .await
            .unwrap();

        match report.outcome("acc-1") {
            Some(WorkerOutcome::Bound { capture }) => {
                assert!(capture.address.starts_with("203.0.113."));
            }
            other => panic!("expected Bound, got {:?}", other),
        }
        // Misses were released; only the capture is still held
        let held = network.held_by("acc-1");
        assert_eq!(held.len(), 1);
        assert!(held[0].binding.is_some());
    }
}
