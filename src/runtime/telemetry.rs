use crate::stream::gate::BoundedGate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing what an input stream has done so far.
#[derive(Default, Debug)]
pub struct Telemetry {
    polls: AtomicU64,
    fetch_errors: AtomicU64,
    fetched_bundles: AtomicU64,
    dispatched_batches: AtomicU64,
    processed_bundles: AtomicU64,
    failed_bundles: AtomicU64,
    emitted_items: AtomicU64,
    unconsumed_bundles: AtomicU64,
}

impl Telemetry {
    pub fn record_poll(&self, fetched: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.fetched_bundles
            .fetch_add(fetched as u64, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, bundles: usize, emitted_items: usize) {
        self.processed_bundles
            .fetch_add(bundles as u64, Ordering::Relaxed);
        self.emitted_items
            .fetch_add(emitted_items as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_bundles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unconsumed(&self) {
        self.unconsumed_bundles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            fetched_bundles: self.fetched_bundles.load(Ordering::Relaxed),
            dispatched_batches: self.dispatched_batches.load(Ordering::Relaxed),
            processed_bundles: self.processed_bundles.load(Ordering::Relaxed),
            failed_bundles: self.failed_bundles.load(Ordering::Relaxed),
            emitted_items: self.emitted_items.load(Ordering::Relaxed),
            unconsumed_bundles: self.unconsumed_bundles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub polls: u64,
    pub fetch_errors: u64,
    pub fetched_bundles: u64,
    pub dispatched_batches: u64,
    pub processed_bundles: u64,
    pub failed_bundles: u64,
    pub emitted_items: u64,
    pub unconsumed_bundles: u64,
}

/// Spawns a background task that periodically logs throughput, gate occupancy, and failures.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    gate: Arc<BoundedGate>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "pplns_stream::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let processed_delta = current_snapshot
                        .processed_bundles
                        .saturating_sub(last_snapshot.processed_bundles);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "pplns_stream::metrics",
                        throughput = format!("{throughput:.2}"),
                        polls = current_snapshot.polls,
                        processed = current_snapshot.processed_bundles,
                        failed = current_snapshot.failed_bundles,
                        emitted = current_snapshot.emitted_items,
                        unconsumed = current_snapshot.unconsumed_bundles,
                        fetch_errors = current_snapshot.fetch_errors,
                        in_flight = gate.in_flight(),
                        capacity = gate.capacity(),
                        "stream metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
