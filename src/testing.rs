//! In-memory runtime and registry that record every call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;

use crate::registry::{RegistryError, ServiceRegistry};
use crate::runtime::{ContainerRuntime, EventStream, RuntimeError};
use crate::types::{ContainerEvent, ContainerSnapshot, RegistrationRecord};

fn docker_failure(message: &str) -> RuntimeError {
    RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    })
}

/// Calls made to either fake, in the order they happened.
pub type Journal = Arc<Mutex<Vec<Call>>>;

struct Subscription {
    items: Vec<Result<ContainerEvent, RuntimeError>>,
    /// Delay before each item; `None` yields everything at once.
    pace: Option<Duration>,
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, ContainerSnapshot>>,
    stopped: Mutex<Vec<String>>,
    subscriptions: Mutex<VecDeque<Subscription>>,
    subscribe_count: AtomicUsize,
    inspect_count: AtomicUsize,
    list_count: AtomicUsize,
    journal: Option<Journal>,
    fail_inspect: bool,
    fail_stop: bool,
}

impl FakeRuntime {
    pub fn with_container(self, snapshot: ContainerSnapshot) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(snapshot.id.clone(), snapshot);
        self
    }

    /// Items yielded by the next subscription. Once exhausted the stream
    /// stays open without yielding. Subscriptions beyond the scripted ones
    /// never yield.
    pub fn with_subscription(self, events: Vec<Result<ContainerEvent, RuntimeError>>) -> Self {
        self.subscriptions.lock().unwrap().push_back(Subscription {
            items: events,
            pace: None,
        });
        self
    }

    /// Like [`with_subscription`](Self::with_subscription), but each event
    /// arrives `gap` after the previous one.
    pub fn with_paced_subscription(self, events: Vec<ContainerEvent>, gap: Duration) -> Self {
        self.subscriptions.lock().unwrap().push_back(Subscription {
            items: events.into_iter().map(Ok).collect(),
            pace: Some(gap),
        });
        self
    }

    /// Records stops into `journal` alongside the registry's calls.
    pub fn sharing_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn failing_inspect(mut self) -> Self {
        self.fail_inspect = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn inspect_count(&self) -> usize {
        self.inspect_count.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.list_count.load(Ordering::SeqCst)
    }

    pub fn subscription_error() -> RuntimeError {
        docker_failure("event stream broke")
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        self.inspect_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_inspect {
            return Err(docker_failure("inspect failed"));
        }
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
        self.list_count.fetch_add(1, Ordering::SeqCst);
        let mut containers: Vec<_> = self.containers.lock().unwrap().values().cloned().collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.stopped.lock().unwrap().push(id.to_string());
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(Call::Stop(id.to_string()));
        }
        if self.fail_stop {
            return Err(docker_failure("stop failed"));
        }
        if let Some(container) = self.containers.lock().unwrap().get_mut(id) {
            container.running = false;
        }
        Ok(())
    }

    fn subscribe_events(&self) -> EventStream {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let Some(subscription) = self.subscriptions.lock().unwrap().pop_front() else {
            return stream::pending().boxed();
        };
        match subscription.pace {
            None => stream::iter(subscription.items)
                .chain(stream::pending())
                .boxed(),
            Some(gap) => stream::iter(subscription.items)
                .then(move |item| async move {
                    tokio::time::sleep(gap).await;
                    item
                })
                .chain(stream::pending())
                .boxed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Register(String),
    Deregister(String),
    IsRegistered(String),
    IsHealthy(String),
    Stop(String),
}

#[derive(Default)]
pub struct FakeRegistry {
    registered: Mutex<HashMap<String, RegistrationRecord>>,
    unhealthy: Mutex<HashSet<String>>,
    records: Mutex<Vec<RegistrationRecord>>,
    calls: Journal,
    fail_mutations: bool,
    block_queries: bool,
}

impl FakeRegistry {
    pub fn with_registered(self, id: &str) -> Self {
        let record = RegistrationRecord {
            id: id.to_string(),
            container_id: id.to_string(),
            name: String::new(),
            port: String::new(),
            tags: Vec::new(),
            checks: Vec::new(),
        };
        self.registered
            .lock()
            .unwrap()
            .insert(id.to_string(), record);
        self
    }

    pub fn with_unhealthy(self, id: &str) -> Self {
        self.unhealthy.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn failing_mutations(mut self) -> Self {
        self.fail_mutations = true;
        self
    }

    /// Queries are recorded and then never answer.
    pub fn blocking_queries(mut self) -> Self {
        self.block_queries = true;
        self
    }

    /// The shared call log, for handing to [`FakeRuntime::sharing_journal`].
    pub fn journal(&self) -> Journal {
        self.calls.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Register and deregister calls, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Register(_) | Call::Deregister(_)))
            .collect()
    }

    /// Every record passed to `register`, in order.
    pub fn registered_records(&self) -> Vec<RegistrationRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn is_listed(&self, id: &str) -> bool {
        self.registered.lock().unwrap().contains_key(id)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn block_if_configured(&self) {
        if self.block_queries {
            std::future::pending::<()>().await;
        }
    }

    fn mutation_result(&self, path: &str) -> Result<(), RegistryError> {
        if self.fail_mutations {
            return Err(RegistryError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                path: path.to_string(),
                body: "registry unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for FakeRegistry {
    async fn register(&self, record: &RegistrationRecord) -> Result<(), RegistryError> {
        self.record(Call::Register(record.id.clone()));
        self.records.lock().unwrap().push(record.clone());
        self.mutation_result("register")?;
        self.registered
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        self.record(Call::Deregister(id.to_string()));
        self.mutation_result("deregister")?;
        self.registered.lock().unwrap().remove(id);
        self.unhealthy.lock().unwrap().remove(id);
        Ok(())
    }

    async fn is_registered(&self, id: &str) -> Result<bool, RegistryError> {
        self.record(Call::IsRegistered(id.to_string()));
        self.block_if_configured().await;
        Ok(self.registered.lock().unwrap().contains_key(id))
    }

    async fn is_healthy(&self, id: &str) -> Result<bool, RegistryError> {
        self.record(Call::IsHealthy(id.to_string()));
        self.block_if_configured().await;
        Ok(!self.unhealthy.lock().unwrap().contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryState;

    #[tokio::test]
    async fn absent_check_state_reads_as_healthy() {
        let registry = FakeRegistry::default();
        let state = RegistryState::query(&registry, "a156e4885334").await.unwrap();
        assert!(state.healthy);
        assert!(!state.registered);
    }

    #[tokio::test]
    async fn oracle_reflects_current_registry_state() {
        let registry = FakeRegistry::default()
            .with_registered("a156e4885334")
            .with_unhealthy("a156e4885334");
        let state = RegistryState::query(&registry, "a156e4885334").await.unwrap();
        assert_eq!(
            state,
            RegistryState {
                registered: true,
                healthy: false
            }
        );

        registry.deregister("a156e4885334").await.unwrap();
        let state = RegistryState::query(&registry, "a156e4885334").await.unwrap();
        assert!(!state.registered);
        assert!(state.healthy);
    }
}
