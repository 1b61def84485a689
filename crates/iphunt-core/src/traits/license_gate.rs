// # License Gate Trait
//
// The licensing service decides whether a hunt may run at all and hands
// out the hunt payload (accounts + ranges). Its protocol is external; the
// core only consumes these two answers.

use async_trait::async_trait;

use crate::config::HuntConfig;

/// Trait for licensing gate implementations
///
/// Implementations return [`Error::Unavailable`](crate::Error::Unavailable)
/// when the service cannot be reached, so the caller can decide whether to
/// fall back to a cached configuration, and
/// [`Error::AccessDenied`](crate::Error::AccessDenied) when the service
/// answered and refused.
#[async_trait]
pub trait LicenseGate: Send + Sync {
    /// Ask whether this installation may hunt
    async fn verify_access(&self) -> Result<bool, crate::Error>;

    /// Fetch the current hunt payload
    async fn fetch_config(&self) -> Result<HuntConfig, crate::Error>;

    /// Gate name (for logging/debugging)
    fn gate_name(&self) -> &'static str;
}
