//! Data structures used throughout the registrator daemon.
//!
//! A [`ContainerSnapshot`] is produced fresh by every inspection of the
//! container runtime and is never mutated afterwards.  A
//! [`RegistrationRecord`] is what ends up in the service registry; the
//! daemon itself never keeps one around between reconciliation passes.

use std::collections::HashMap;

use crate::health_check::HealthCheckSpec;

/// Length of the truncated container ID used as the registry key.
pub const SHORT_ID_LEN: usize = 12;

/// Returns the truncated form of a container ID.
///
/// IDs shorter than [`SHORT_ID_LEN`] are returned unchanged.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Immutable view of one container at inspection time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSnapshot {
    /// Full container ID as reported by the runtime.
    pub id: String,
    /// Truncated ID, used as the key of the registry entry.
    pub short_id: String,
    /// Runtime-assigned name, without the leading `/`.
    pub name: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
    /// Container port spec (`80/tcp`) to host port (`3000`).
    pub port_bindings: HashMap<String, String>,
}

impl ContainerSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();
        Self {
            short_id: short_id(&id).to_string(),
            name: name.trim_start_matches('/').to_string(),
            id,
            ..Default::default()
        }
    }

    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_port_bindings<I, K, V>(mut self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.port_bindings = bindings
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// A lifecycle event emitted by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    /// Event scope, e.g. `container`, `network`, `image`.
    pub kind: String,
    /// Event action, e.g. `create`, `stop`, `kill`.
    pub action: String,
    pub container_id: String,
}

impl ContainerEvent {
    pub fn new(
        kind: impl Into<String>,
        action: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
            container_id: container_id.into(),
        }
    }

    /// Whether this event should trigger a reconciliation pass.
    pub fn is_relevant(&self) -> bool {
        self.kind == "container"
            && matches!(self.action.as_str(), "create" | "stop" | "kill")
            && !self.container_id.is_empty()
    }
}

/// A service instance as submitted to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Truncated container ID; the registry key.
    pub id: String,
    /// Full container ID, needed by checks that execute inside the container.
    pub container_id: String,
    pub name: String,
    /// Resolved host port. Empty means "not exposed"; may be non-numeric
    /// when the port label has no matching host binding.
    pub port: String,
    pub tags: Vec<String>,
    pub checks: Vec<HealthCheckSpec>,
}
