//! Service registry abstraction and the registration-state oracle.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::RegistrationRecord;

pub mod consul;
pub use consul::ConsulRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status} for {path}: {body}")]
    Status {
        status: reqwest::StatusCode,
        path: String,
        body: String,
    },
}

/// The service registry operations the reconciler depends on.
///
/// Implementations must not cache: every call reflects the registry's
/// current state.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, record: &RegistrationRecord) -> Result<(), RegistryError>;

    async fn deregister(&self, id: &str) -> Result<(), RegistryError>;

    /// True iff an entry with exactly this ID is currently listed.
    async fn is_registered(&self, id: &str) -> Result<bool, RegistryError>;

    /// False only when a check for this ID is known to be failing.
    /// No check state at all counts as healthy.
    async fn is_healthy(&self, id: &str) -> Result<bool, RegistryError>;
}

/// What the registry currently says about one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryState {
    pub registered: bool,
    pub healthy: bool,
}

impl RegistryState {
    pub async fn query(registry: &dyn ServiceRegistry, id: &str) -> Result<Self, RegistryError> {
        let healthy = registry.is_healthy(id).await?;
        let registered = registry.is_registered(id).await?;
        Ok(Self {
            registered,
            healthy,
        })
    }
}
