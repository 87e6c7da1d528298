//! Background tasks scoped to one started stream.

use super::gate::BoundedGate;
use crate::runtime::telemetry::{self, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    metrics_handle: Option<JoinHandle<()>>,
    watcher_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub gate: Arc<BoundedGate>,
    pub metrics_interval: Duration,
    /// Runs once if the root token is cancelled while the run is still live.
    pub on_shutdown: ShutdownHook,
}

impl LifecycleHandles {
    /// Spawns the run-scoped tasks. Must be called from within a tokio runtime.
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            gate,
            metrics_interval,
            on_shutdown,
        } = params;

        let run_token = shutdown_root.child_token();
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            gate,
            run_token.clone(),
            metrics_interval,
        );
        let watcher_handle = tokio::spawn(watch_shutdown(
            shutdown_root.clone(),
            run_token.clone(),
            on_shutdown,
        ));

        Self {
            run_token,
            metrics_handle: Some(metrics_handle),
            watcher_handle: Some(watcher_handle),
        }
    }

    pub(crate) fn cancel(&self) {
        self.run_token.cancel();
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
        if let Some(handle) = self.watcher_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "shutdown watcher task panicked");
            }
        }
    }
}

async fn watch_shutdown(
    shutdown_root: CancellationToken,
    run_token: CancellationToken,
    on_shutdown: ShutdownHook,
) {
    tokio::select! {
        biased;
        _ = shutdown_root.cancelled() => {
            tracing::info!("shutdown requested; closing input stream");
            on_shutdown();
        }
        _ = run_token.cancelled() => {}
    }
}
