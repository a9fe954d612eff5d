use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub consul_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consul_token: Option<String>,
    pub sweep_interval_secs: u64,
    /// Grace period for stopping unhealthy containers; the runtime's own
    /// default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<i64>,
    pub connect_retry_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consul_address: "http://127.0.0.1:8500".into(),
            consul_token: None,
            sweep_interval_secs: 5,
            stop_timeout_secs: None,
            connect_retry_secs: 3,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            // Standard Consul client variables, overridable by our own.
            .merge(
                Env::raw()
                    .only(&["CONSUL_HTTP_ADDR", "CONSUL_HTTP_TOKEN"])
                    .map(|key| {
                        if key.as_str().eq_ignore_ascii_case("consul_http_addr") {
                            "consul_address".into()
                        } else if key.as_str().eq_ignore_ascii_case("consul_http_token") {
                            "consul_token".into()
                        } else {
                            key.as_str().into()
                        }
                    }),
            )
            .merge(Toml::file("registrator.toml"))
            .merge(Json::file("registrator.json"))
            .merge(Env::prefixed("REGISTRATOR_"))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(token_file) = std::env::var("REGISTRATOR_CONSUL_TOKEN_FILE") {
            config.consul_token = Some(std::fs::read_to_string(token_file)?.trim().to_string());
        }

        config.consul_address = normalize_address(&config.consul_address);
        if config.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than zero");
        }

        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }
}

/// `CONSUL_HTTP_ADDR` is commonly given as a bare `host:port`.
fn normalize_address(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
