//! Reconciliation engine.
//!
//! One pass looks at a single container: derive its descriptor, ask the
//! registry what it currently knows, pick exactly one [`Decision`] and
//! apply it.  Nothing is retried here.  A failed step aborts the pass and
//! the next event or sweep re-evaluates the container from scratch.

use std::sync::Arc;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::descriptor::ServiceDescriptor;
use crate::registry::{RegistryError, RegistryState, ServiceRegistry};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::types::{short_id, ContainerSnapshot};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Register,
    Deregister,
    StopAndDeregister,
    NoOp,
}

/// Maps runtime and registry state to the action that makes them agree.
pub fn decide(running: bool, registered: bool, healthy: bool) -> Decision {
    match (running, registered, healthy) {
        (true, false, _) => Decision::Register,
        (false, true, _) => Decision::Deregister,
        (true, true, false) => Decision::StopAndDeregister,
        _ => Decision::NoOp,
    }
}

pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn ServiceRegistry>,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// Inspects the container and reconciles it.
    ///
    /// A container the runtime no longer knows is deregistered if an
    /// entry for it is still around.
    pub async fn reconcile(&self, container_id: &str) -> Result<Decision, ReconcileError> {
        match self.runtime.inspect(container_id).await {
            Ok(snapshot) => self.reconcile_snapshot(&snapshot).await,
            Err(RuntimeError::NotFound(_)) => self.reconcile_missing(container_id).await,
            Err(e) => Err(e.into()),
        }
    }

    pub async fn reconcile_snapshot(
        &self,
        snapshot: &ContainerSnapshot,
    ) -> Result<Decision, ReconcileError> {
        let Some(descriptor) = ServiceDescriptor::from_snapshot(snapshot) else {
            debug!("Container {} has no service name, ignoring", snapshot.short_id);
            return Ok(Decision::NoOp);
        };

        let state = RegistryState::query(self.registry.as_ref(), &snapshot.short_id).await?;
        let decision = decide(snapshot.running, state.registered, state.healthy);
        debug!(
            "Container {} ({}): running={} registered={} healthy={} -> {:?}",
            snapshot.short_id,
            descriptor.name,
            snapshot.running,
            state.registered,
            state.healthy,
            decision
        );

        self.apply(decision, snapshot, &descriptor).await?;
        Ok(decision)
    }

    async fn reconcile_missing(&self, container_id: &str) -> Result<Decision, ReconcileError> {
        let id = short_id(container_id);
        if !self.registry.is_registered(id).await? {
            debug!("Container {} is gone and not registered", id);
            return Ok(Decision::NoOp);
        }
        info!("Container {} is gone, removing from registry", id);
        self.deregister(id).await?;
        Ok(Decision::Deregister)
    }

    async fn apply(
        &self,
        decision: Decision,
        snapshot: &ContainerSnapshot,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), ReconcileError> {
        match decision {
            Decision::Register => {
                info!(
                    "Container {} is running, registering service {}",
                    snapshot.short_id, descriptor.name
                );
                if let Err(e) = self.registry.register(&descriptor.to_record(snapshot)).await {
                    error!("Failed to register {}: {}", snapshot.short_id, e);
                    return Err(e.into());
                }
            }
            Decision::Deregister => {
                info!(
                    "Container {} is not running, removing service {}",
                    snapshot.short_id, descriptor.name
                );
                self.deregister(&snapshot.short_id).await?;
            }
            Decision::StopAndDeregister => {
                info!(
                    "Container {} is unhealthy, stopping and removing service {}",
                    snapshot.short_id, descriptor.name
                );
                // A failed stop must not keep the instance in discovery.
                if let Err(e) = self.runtime.stop(&snapshot.id).await {
                    warn!("Failed to stop {}: {}", snapshot.short_id, e);
                }
                self.deregister(&snapshot.short_id).await?;
            }
            Decision::NoOp => {}
        }
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), ReconcileError> {
        self.registry.deregister(id).await.map_err(|e| {
            error!("Failed to deregister {}: {}", id, e);
            e.into()
        })
    }
}
