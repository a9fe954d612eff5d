//! Event-driven watch loop.
//!
//! The watcher is the only place decisions are made, one container at a
//! time.  Each iteration services exactly one of: shutdown, an incoming
//! runtime event, a broken subscription, or the sweep timer.  The timer
//! is re-armed on every iteration, so a sweep only runs after a full
//! interval without events.
//!
//! A broken subscription is reopened straight away, with no delay.  While
//! the runtime stays unreachable this spins, and the sweep never fires
//! since every failure re-arms the timer.  Only the first failure and then
//! every power-of-two count are logged at `warn`; the rest go to `debug`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::reconcile::Reconciler;
use crate::runtime::ContainerRuntime;
use crate::types::ContainerEvent;

pub struct Watcher {
    runtime: Arc<dyn ContainerRuntime>,
    reconciler: Reconciler,
    sweep_interval: Duration,
}

impl Watcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        reconciler: Reconciler,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            runtime,
            reconciler,
            sweep_interval,
        }
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut failures: u64 = 0;
        'subscribe: while !shutdown.is_cancelled() {
            let mut events = self.runtime.subscribe_events();
            info!("Listening for container events...");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'subscribe,
                    msg = events.next() => match msg {
                        Some(Ok(event)) => {
                            failures = 0;
                            self.handle_event(&event, &shutdown).await;
                        }
                        Some(Err(e)) => {
                            failures += 1;
                            if should_warn(failures) {
                                warn!(
                                    "Container event subscription failed ({} in a row): {}. Resubscribing",
                                    failures, e
                                );
                            } else {
                                debug!("Container event subscription failed: {}. Resubscribing", e);
                            }
                            continue 'subscribe;
                        }
                        None => {
                            failures += 1;
                            if should_warn(failures) {
                                warn!(
                                    "Container event stream ended ({} in a row). Resubscribing",
                                    failures
                                );
                            } else {
                                debug!("Container event stream ended. Resubscribing");
                            }
                            continue 'subscribe;
                        }
                    },
                    _ = tokio::time::sleep(self.sweep_interval) => self.sweep(&shutdown).await,
                }
            }
        }
        info!("Watcher stopped");
    }

    async fn handle_event(&self, event: &ContainerEvent, shutdown: &CancellationToken) {
        if !event.is_relevant() {
            return;
        }
        debug!("Container {} {}", event.action, event.container_id);
        let pass = self.reconciler.reconcile(&event.container_id);
        if let Some(Err(e)) = until_cancelled(shutdown, pass).await {
            warn!("Reconciliation of {} failed: {}", event.container_id, e);
        }
    }

    /// Reconciles every container the runtime currently knows about.
    pub async fn sweep(&self, shutdown: &CancellationToken) {
        let containers = match until_cancelled(shutdown, self.runtime.list()).await {
            Some(Ok(containers)) => containers,
            Some(Err(e)) => {
                warn!("Failed to list containers: {}", e);
                return;
            }
            None => return,
        };
        debug!("Sweeping {} containers", containers.len());

        for snapshot in &containers {
            match until_cancelled(shutdown, self.reconciler.reconcile_snapshot(snapshot)).await {
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!("Reconciliation of {} failed: {}", snapshot.short_id, e),
                None => return,
            }
        }
    }
}

fn should_warn(consecutive_failures: u64) -> bool {
    consecutive_failures.is_power_of_two()
}

/// Drives `fut` unless `shutdown` fires first, in which case it is dropped.
async fn until_cancelled<F: Future>(shutdown: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        out = fut => Some(out),
    }
}
