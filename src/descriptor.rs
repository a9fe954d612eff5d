//! Derives a service descriptor from a container's labels and port bindings.

use crate::health_check::HealthCheckSpec;
use crate::types::{ContainerSnapshot, RegistrationRecord};

/// Label keys tried in order for the service name.
pub const SERVICE_NAME_KEYS: [&str; 2] = [
    "service.name",
    "com.amazonaws.ecs.task-definition-family",
];
pub const SERVICE_PORT_KEY: &str = "service.port";
pub const SERVICE_TAGS_KEY: &str = "service.tags";
pub const HEALTH_CHECK_KEY: &str = "service.health-check";

/// The derived (name, port, tags, check) view of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub port: String,
    pub tags: Vec<String>,
    pub check: Option<HealthCheckSpec>,
}

impl ServiceDescriptor {
    /// Returns `None` when the container has no usable service name,
    /// meaning it is not a managed service.
    pub fn from_snapshot(snapshot: &ContainerSnapshot) -> Option<Self> {
        let name = service_name(snapshot)?;
        let port = service_port(snapshot);
        let check = snapshot
            .label(HEALTH_CHECK_KEY)
            .and_then(|desc| HealthCheckSpec::parse(desc, &port));

        Some(Self {
            name,
            tags: service_tags(snapshot),
            port,
            check,
        })
    }

    pub fn to_record(&self, snapshot: &ContainerSnapshot) -> RegistrationRecord {
        RegistrationRecord {
            id: snapshot.short_id.clone(),
            container_id: snapshot.id.clone(),
            name: self.name.clone(),
            port: self.port.clone(),
            tags: self.tags.clone(),
            checks: self.check.iter().cloned().collect(),
        }
    }
}

/// Resolves the service name: the first non-empty name label, else the
/// runtime name.
pub fn service_name(snapshot: &ContainerSnapshot) -> Option<String> {
    SERVICE_NAME_KEYS
        .iter()
        .filter_map(|key| snapshot.label(key))
        .chain(std::iter::once(snapshot.name.as_str()))
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Resolves the host port bound to the `service.port` container port.
///
/// Without a matching binding the raw label value is returned, so the
/// result is not necessarily numeric.
pub fn service_port(snapshot: &ContainerSnapshot) -> String {
    let spec = snapshot.label(SERVICE_PORT_KEY).unwrap_or_default();
    snapshot
        .port_bindings
        .get(spec)
        .cloned()
        .unwrap_or_else(|| spec.to_string())
}

/// Splits `service.tags` on commas, verbatim. An absent or empty label
/// yields a single empty tag.
pub fn service_tags(snapshot: &ContainerSnapshot) -> Vec<String> {
    snapshot
        .label(SERVICE_TAGS_KEY)
        .unwrap_or_default()
        .split(',')
        .map(str::to_string)
        .collect()
}
