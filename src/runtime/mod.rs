use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::types::{ContainerEvent, ContainerSnapshot};

pub mod docker;
pub use docker::DockerRuntime;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container {0} not found")]
    NotFound(String),
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Stream of runtime events. An `Err` item means the subscription is dead.
pub type EventStream = BoxStream<'static, Result<ContainerEvent, RuntimeError>>;

/// The container runtime operations the reconciler depends on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError>;

    /// Snapshots of every container the runtime knows, running or not.
    async fn list(&self) -> Result<Vec<ContainerSnapshot>, RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Opens a fresh event subscription.
    fn subscribe_events(&self) -> EventStream;
}
