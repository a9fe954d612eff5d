use super::{ContainerRuntime, EventStream, RuntimeError};
use crate::types::{ContainerEvent, ContainerSnapshot};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, StopContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, EventMessage, PortMap};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;

pub struct DockerRuntime {
    docker: Docker,
    stop_timeout: Option<i64>,
}

impl DockerRuntime {
    pub fn new(docker: Docker, stop_timeout: Option<i64>) -> Self {
        Self {
            docker,
            stop_timeout,
        }
    }

    /// Connects to the local Docker daemon and checks it answers.
    pub async fn connect(stop_timeout: Option<i64>) -> Result<Self, RuntimeError> {
        // Handles the unix socket on Linux.
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("Connected to Docker");
        Ok(Self::new(docker, stop_timeout))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        match self.docker.inspect_container(id, None).await {
            Ok(detail) => Ok(snapshot_from_inspect(id, detail)),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(RuntimeError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
        // Stopped containers too, so the sweep can withdraw them.
        let opts = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        let mut snapshots = Vec::with_capacity(containers.len());
        for id in containers.into_iter().filter_map(|c| c.id) {
            match self.inspect(&id).await {
                Ok(snapshot) => snapshots.push(snapshot),
                // Removed between list and inspect.
                Err(RuntimeError::NotFound(_)) => debug!("Container {} vanished during list", id),
                // Left for the next event or sweep; the rest still get their pass.
                Err(e) => warn!("Failed to inspect container {} during list: {}", id, e),
            }
        }
        Ok(snapshots)
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let opts = self.stop_timeout.map(|t| StopContainerOptions { t });
        match self.docker.stop_container(id, opts).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(RuntimeError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe_events(&self) -> EventStream {
        let opts = EventsOptions::<String> {
            filters: [
                ("type", ["container"].as_slice()),
                ("event", ["create", "stop", "kill"].as_slice()),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        };

        self.docker
            .events(Some(opts))
            .filter_map(|msg| async move {
                match msg {
                    Ok(event) => event_from_message(event).map(Ok),
                    Err(e) => {
                        warn!("Error in Docker event stream: {}", e);
                        Some(Err(RuntimeError::from(e)))
                    }
                }
            })
            .boxed()
    }
}

fn event_from_message(event: EventMessage) -> Option<ContainerEvent> {
    let kind = event.typ.map(|t| t.to_string()).unwrap_or_default();
    let action = event.action.unwrap_or_default();
    let id = event.actor.and_then(|actor| actor.id)?;
    debug!("Docker event: {} {} for {}", kind, action, id);
    Some(ContainerEvent::new(kind, action, id))
}

/// Builds a snapshot from an inspect response. `requested_id` is used
/// when the response carries no ID of its own.
fn snapshot_from_inspect(requested_id: &str, detail: ContainerInspectResponse) -> ContainerSnapshot {
    let id = detail.id.unwrap_or_else(|| requested_id.to_string());
    let name = detail.name.unwrap_or_default();
    let labels = detail
        .config
        .and_then(|config| config.labels)
        .unwrap_or_default();
    let running = detail
        .state
        .and_then(|state| state.running)
        .unwrap_or(false);

    // Explicit bindings first, then whatever the daemon actually published.
    let mut port_bindings = detail
        .host_config
        .and_then(|hc| hc.port_bindings)
        .map(host_ports)
        .unwrap_or_default();
    if let Some(published) = detail
        .network_settings
        .and_then(|ns| ns.ports)
        .map(host_ports)
    {
        for (spec, port) in published {
            port_bindings.entry(spec).or_insert(port);
        }
    }

    ContainerSnapshot::new(id, name)
        .with_labels(labels)
        .with_port_bindings(port_bindings)
        .running(running)
}

/// First non-empty host port for each container port spec.
fn host_ports(map: PortMap) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(spec, bindings)| {
            let port = bindings?
                .into_iter()
                .filter_map(|b| b.host_port)
                .find(|p| !p.is_empty())?;
            Some((spec, port))
        })
        .collect()
}
