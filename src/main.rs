//! Registrator daemon entry point.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod config;
mod descriptor;
mod health_check;
mod reconcile;
mod registry;
mod runtime;
#[cfg(test)]
mod testing;
mod types;
mod watcher;

use config::Config;
use reconcile::Reconciler;
use registry::ConsulRegistry;
use runtime::DockerRuntime;
use watcher::Watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting registrator with config: {:?}", redacted(&cfg));

    let shutdown = CancellationToken::new();
    let signal_handle = tokio::spawn(cancel_on_signal(shutdown.clone()));

    // Service registry (Consul agent)
    let consul = ConsulRegistry::new(&cfg.consul_address, cfg.consul_token.clone())?;
    let connected = retry_until_ready("consul", cfg.connect_retry(), &shutdown, || async {
        consul.leader().await.map(|leader| {
            info!("Connected to consul, leader is {}", leader);
        })
    })
    .await;
    if connected.is_none() {
        info!("Shutdown before consul was reachable");
        return Ok(());
    }

    // Container runtime (Docker)
    let Some(docker) = retry_until_ready("docker", cfg.connect_retry(), &shutdown, || {
        DockerRuntime::connect(cfg.stop_timeout_secs)
    })
    .await
    else {
        info!("Shutdown before docker was reachable");
        return Ok(());
    };

    let runtime = Arc::new(docker);
    let reconciler = Reconciler::new(runtime.clone(), Arc::new(consul));
    let watcher = Watcher::new(runtime, reconciler, cfg.sweep_interval());

    let watcher_shutdown = shutdown.clone();
    let watcher_handle = tokio::spawn(async move { watcher.run(watcher_shutdown).await });

    if let Err(e) = watcher_handle.await {
        error!("Watcher task failed: {}", e);
    }
    signal_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}

/// Calls `connect` until it succeeds, waiting `delay` between attempts.
/// Returns `None` if shutdown is requested first.
async fn retry_until_ready<T, E, F, Fut>(
    what: &str,
    delay: Duration,
    shutdown: &CancellationToken,
    mut connect: F,
) -> Option<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            result = connect() => match result {
                Ok(value) => return Some(value),
                Err(e) => warn!("Could not connect to {}: {}. Retrying in {:?}", what, e, delay),
            },
        }
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
    shutdown.cancel();
}

fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    if cfg.consul_token.is_some() {
        cfg.consul_token = Some("<redacted>".into());
    }
    cfg
}
