//! Consul agent client.
//!
//! Talks to the local agent's HTTP API.  Only the handful of endpoints the
//! reconciler needs are covered:
//!
//! * `PUT /v1/agent/service/register`
//! * `PUT /v1/agent/service/deregister/{id}`
//! * `GET /v1/agent/services`
//! * `GET /v1/agent/checks`
//! * `GET /v1/status/leader` (connectivity check at startup)

use std::collections::HashMap;

use async_trait::async_trait;
use log::warn;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{RegistryError, ServiceRegistry};
use crate::health_check::{CheckKind, HealthCheckSpec};
use crate::types::RegistrationRecord;

const TOKEN_HEADER: &str = "X-Consul-Token";
const CRITICAL: &str = "critical";

pub struct ConsulRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    port: u16,
    tags: &'a [String],
    checks: Vec<ServiceCheck<'a>>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceCheck<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shell: Option<&'a str>,
    #[serde(rename = "DockerContainerID", skip_serializing_if = "Option::is_none")]
    docker_container_id: Option<&'a str>,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<&'a str>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    tcp: Option<&'a str>,
    interval: &'a str,
    timeout: &'a str,
}

impl<'a> ServiceCheck<'a> {
    fn new(spec: &'a HealthCheckSpec, container_id: &'a str) -> Self {
        let mut check = ServiceCheck {
            interval: &spec.interval,
            timeout: &spec.timeout,
            ..Default::default()
        };
        let target = spec.target.as_str();
        match spec.kind {
            CheckKind::Script => check.args = Some(vec![target]),
            CheckKind::Shell => {
                check.shell = Some(target);
                check.docker_container_id = Some(container_id);
            }
            CheckKind::Http => check.http = Some(target),
            CheckKind::Tcp => check.tcp = Some(target),
        }
        check
    }
}

#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "ServiceID", default)]
    service_id: String,
    #[serde(default)]
    status: String,
}

impl ConsulRegistry {
    pub fn new(address: &str, token: Option<String>) -> Result<Self, RegistryError> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: address.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Returns the current raft leader; fails if the agent is unreachable.
    pub async fn leader(&self) -> Result<String, RegistryError> {
        self.get("/v1/status/leader").await
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RegistryError> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        Ok(check_status(path, response).await?.json().await?)
    }

    async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), RegistryError> {
        let mut builder = self.request(reqwest::Method::PUT, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        check_status(path, builder.send().await?).await?;
        Ok(())
    }
}

async fn check_status(path: &str, response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Status {
        status,
        path: path.to_string(),
        body,
    })
}

/// Consul wants a numeric port; anything else is registered as 0.
fn numeric_port(record: &RegistrationRecord) -> u16 {
    if record.port.is_empty() {
        return 0;
    }
    record.port.parse().unwrap_or_else(|_| {
        warn!(
            "Service {} has non-numeric port {:?}, registering without port",
            record.id, record.port
        );
        0
    })
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(&self, record: &RegistrationRecord) -> Result<(), RegistryError> {
        let registration = ServiceRegistration {
            id: &record.id,
            name: &record.name,
            port: numeric_port(record),
            tags: &record.tags,
            checks: record
                .checks
                .iter()
                .map(|spec| ServiceCheck::new(spec, &record.container_id))
                .collect(),
        };
        self.put("/v1/agent/service/register", Some(&registration))
            .await
    }

    async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        self.put::<()>(&format!("/v1/agent/service/deregister/{}", id), None)
            .await
    }

    async fn is_registered(&self, id: &str) -> Result<bool, RegistryError> {
        let services: HashMap<String, AgentService> = self.get("/v1/agent/services").await?;
        Ok(services.values().any(|svc| svc.id == id))
    }

    async fn is_healthy(&self, id: &str) -> Result<bool, RegistryError> {
        let checks: HashMap<String, AgentCheck> = self.get("/v1/agent/checks").await?;
        Ok(!checks
            .values()
            .any(|check| check.service_id == id && check.status == CRITICAL))
    }
}
