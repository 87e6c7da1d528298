//! The consumer loop and the stream object callers hold.
//!
//! An `InputStream` polls the store for bundles addressed to one consumer
//! node, prepares each bundle against its worker, and hands the prepared
//! input to the bound processor through the dispatcher. Polling runs on the
//! scheduler's timer, or on demand through [`InputStream::poll`] when the
//! stream is configured for manual polling.

use super::dispatch::{self, DispatchContext, DispatchReport, Dispatcher, FlowControl};
use super::events::EventBus;
use super::gate::BoundedGate;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::scheduler::{Scheduler, SchedulerState, TickAction};
use crate::api::{ApiMetricsSnapshot, ApiOperation, Bundle, BundleQuery, MeteredApi, PipelineApi};
use crate::prepare::{prepare_bundle, InputReceipt, PreparedInput};
use crate::runtime::config::StreamConfig;
use crate::runtime::error::{ConfigurationError, StreamError};
use crate::runtime::processor::Processor;
use crate::runtime::telemetry::{Telemetry, TelemetrySnapshot};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Handle to one input stream. Clones share the same stream.
#[derive(Clone)]
pub struct InputStream {
    shared: Arc<StreamShared>,
}

struct StreamShared {
    api: MeteredApi,
    query: BundleQuery,
    config: StreamConfig,
    gate: Arc<BoundedGate>,
    scheduler: Scheduler,
    events: EventBus<Dispatcher>,
    telemetry: Arc<Telemetry>,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown_root: CancellationToken,
    lifecycle: Mutex<Option<LifecycleHandles>>,
    this: Weak<StreamShared>,
}

impl InputStream {
    /// Creates a stream polling `api` with `query`.
    ///
    /// The stream creates its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to tie it to an existing shutdown
    /// mechanism. Cancelling the root token closes the stream.
    pub fn new(api: Arc<dyn PipelineApi>, query: BundleQuery, config: StreamConfig) -> Self {
        Self::with_cancellation_token(api, query, config, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        api: Arc<dyn PipelineApi>,
        query: BundleQuery,
        config: StreamConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<StreamShared>| {
            let this = weak.clone();
            let weak = weak.clone();
            let action: TickAction = Arc::new(move || -> BoxFuture<'static, ()> {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.tick().await;
                    }
                })
            });

            StreamShared {
                api: MeteredApi::new(api),
                gate: Arc::new(BoundedGate::new(config.max_concurrency())),
                scheduler: Scheduler::new(config.polling(), action),
                events: EventBus::new(),
                telemetry: Arc::new(Telemetry::default()),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown_root: shutdown_token,
                lifecycle: Mutex::new(None),
                this,
                query,
                config,
            }
        });

        Self { shared }
    }

    /// Binds the processor that receives every prepared input.
    ///
    /// A stream feeds exactly one processor; binding a second one fails.
    pub fn on_data(&self, processor: Processor) -> Result<(), ConfigurationError> {
        tracing::debug!(processor = ?processor, "binding data handler");
        self.shared.events.set_data(Dispatcher::new(processor))
    }

    /// Registers a handler for every error the stream reports.
    pub fn on_error(&self, handler: impl Fn(&StreamError) + Send + Sync + 'static) -> &Self {
        self.shared.events.on_error(handler);
        self
    }

    /// Registers a handler invoked once when the stream closes.
    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) -> &Self {
        self.shared.events.on_close(handler);
        self
    }

    /// Starts polling on the configured interval.
    ///
    /// Fails when no data handler is bound, when the stream is closed or its
    /// root token cancelled, or when called outside a tokio runtime. Starting a started stream is a no-op;
    /// in manual polling mode no timer is started.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) || shared.close_if_cancelled() {
            return Err(ConfigurationError::StreamClosed.into());
        }
        if !shared.events.has_data() {
            return Err(ConfigurationError::MissingDataHandler.into());
        }
        Handle::try_current().context("input stream requires a tokio runtime")?;

        shared.ensure_lifecycle();
        shared.started.store(true, Ordering::SeqCst);
        if shared.scheduler.start()? {
            tracing::info!(
                consumer_id = %shared.query.consumer_id,
                task_id = %shared.query.task_id,
                max_concurrency = shared.gate.capacity(),
                "input stream started"
            );
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.start()
    }

    /// Stops the timer. Ticks already running finish normally, and capacity
    /// freed afterwards does not restart polling until the next `resume`.
    pub fn pause(&self) {
        self.shared.started.store(false, Ordering::SeqCst);
        if self.shared.scheduler.pause() {
            tracing::info!(consumer_id = %self.shared.query.consumer_id, "input stream paused");
        }
    }

    /// Runs one poll iteration and returns the number of bundles fetched.
    ///
    /// Bundles of one page are dispatched in fetch order, one after the other.
    /// Failures while processing a bundle are reported through the error event;
    /// only a failed fetch is returned.
    pub async fn poll(&self) -> Result<usize, StreamError> {
        self.shared.poll_once(false).await
    }

    /// Stops polling for good and raises the close event. In-flight processor
    /// calls finish normally. Returns `false` if the stream was already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Closes the stream, then waits for running ticks and background tasks.
    pub async fn shutdown(&self) {
        self.close();
        let lifecycle = self.shared.lifecycle().take();
        if let Some(lifecycle) = lifecycle {
            lifecycle.shutdown().await;
        }
        self.wait_idle().await;
    }

    /// Waits until every tick fired so far has finished.
    pub async fn wait_idle(&self) {
        self.shared.scheduler.wait_idle().await;
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.scheduler.state()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Gate slots currently held by running ticks and manual dispatches.
    pub fn in_flight(&self) -> usize {
        self.shared.gate.in_flight()
    }

    pub fn query(&self) -> &BundleQuery {
        &self.shared.query
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.telemetry.snapshot()
    }

    pub fn api_metrics(&self) -> ApiMetricsSnapshot {
        self.shared.api.metrics()
    }

    /// Root token; cancelling it closes the stream and stops its background tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.shutdown_root.clone()
    }
}

impl StreamShared {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.started.store(false, Ordering::SeqCst);
        self.scheduler.pause();
        if let Some(lifecycle) = self.lifecycle().as_ref() {
            lifecycle.cancel();
        }

        tracing::info!(consumer_id = %self.query.consumer_id, "input stream closed");
        self.events.emit_close();
        true
    }

    fn wants_polling(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Closes the stream when its root token was cancelled. Returns whether
    /// the token was cancelled.
    fn close_if_cancelled(&self) -> bool {
        if !self.shutdown_root.is_cancelled() {
            return false;
        }
        self.close();
        true
    }

    /// One scheduled poll. The tick holds a gate slot from before the fetch
    /// until its last dispatch finishes, so overlapping ticks never admit more
    /// than the gate's capacity.
    async fn tick(&self) {
        if self.closed.load(Ordering::SeqCst) || self.close_if_cancelled() {
            return;
        }
        let Some(_slot) = dispatch::try_admit(&self.gate, self) else {
            tracing::trace!(capacity = self.gate.capacity(), "gate saturated; skipping tick");
            return;
        };

        match self.poll_once(true).await {
            Ok(_) => {}
            Err(StreamError::Configuration(err)) => {
                tracing::debug!(error = %err, "tick skipped");
            }
            Err(err) => {
                tracing::warn!(error = %err, "poll iteration failed");
                self.events.emit_error(&err);
            }
        }
    }

    /// Fetches one page and dispatches it. `reserved` is set when the caller
    /// already holds the gate slot the dispatches run under.
    async fn poll_once(&self, reserved: bool) -> Result<usize, StreamError> {
        if self.closed.load(Ordering::SeqCst) || self.close_if_cancelled() {
            return Err(ConfigurationError::StreamClosed.into());
        }
        let Some(dispatcher) = self.events.data() else {
            return Err(ConfigurationError::MissingDataHandler.into());
        };

        let bundles = match self.api.fetch_bundles(&self.query).await {
            Ok(bundles) => bundles,
            Err(source) => {
                self.telemetry.record_fetch_error();
                return Err(StreamError::collaborator(ApiOperation::FetchBundles, source));
            }
        };
        self.telemetry.record_poll(bundles.len());

        let fetched = bundles.len();
        if fetched == 0 {
            tracing::trace!(consumer_id = %self.query.consumer_id, "no bundles available");
            return Ok(0);
        }
        tracing::debug!(
            consumer_id = %self.query.consumer_id,
            task_id = %self.query.task_id,
            fetched,
            "fetched bundles"
        );

        let ctx = self.dispatch_context(reserved);
        let batch_size = dispatcher.max_batch_size();
        let mut pending: Vec<PreparedInput> = Vec::with_capacity(batch_size.min(fetched));
        let mut report = DispatchReport::default();

        for bundle in bundles {
            match self.prepare(bundle) {
                Ok(input) => {
                    pending.push(input);
                    if pending.len() >= batch_size {
                        let batch = mem::take(&mut pending);
                        merge(&mut report, dispatcher.dispatch(&ctx, batch).await);
                    }
                }
                Err((receipt, err)) => {
                    ctx.fail(&receipt, &err).await;
                    report.failed += 1;
                }
            }
        }
        if !pending.is_empty() {
            merge(&mut report, dispatcher.dispatch(&ctx, pending).await);
        }

        tracing::debug!(
            processed = report.processed,
            failed = report.failed,
            emitted = report.emitted,
            "poll iteration finished"
        );
        Ok(fetched)
    }

    fn prepare(&self, bundle: Bundle) -> Result<PreparedInput, (InputReceipt, StreamError)> {
        let receipt = InputReceipt::from_bundle(&bundle);
        let worker = match self.api.lookup_worker(bundle.worker_id.as_deref()) {
            Ok(worker) => worker,
            Err(source) => {
                return Err((
                    receipt,
                    StreamError::collaborator(ApiOperation::LookupWorker, source),
                ))
            }
        };

        prepare_bundle(&worker, bundle).map_err(|err| (receipt, err.into()))
    }

    fn dispatch_context(&self, reserved: bool) -> DispatchContext<'_> {
        DispatchContext {
            api: &self.api,
            gate: &self.gate,
            events: &self.events,
            telemetry: &self.telemetry,
            flow: self,
            reserved,
        }
    }

    fn ensure_lifecycle(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.is_none() {
            let this = self.this.clone();
            *lifecycle = Some(LifecycleHandles::spawn(LifecycleSpawnParams {
                shutdown_root: &self.shutdown_root,
                telemetry: self.telemetry.clone(),
                gate: self.gate.clone(),
                metrics_interval: self.config.metrics_interval(),
                on_shutdown: Box::new(move || {
                    if let Some(shared) = this.upgrade() {
                        shared.close();
                    }
                }),
            }));
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<LifecycleHandles>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlowControl for StreamShared {
    fn saturated(&self) {
        if self.scheduler.pause() {
            tracing::debug!(
                capacity = self.gate.capacity(),
                "concurrency limit reached; polling paused"
            );
        }
    }

    fn drained(&self) {
        if !self.wants_polling() {
            return;
        }
        match self.scheduler.resume() {
            // A concurrent pause or close may have landed after the check above.
            Ok(true) if !self.wants_polling() => {
                self.scheduler.pause();
            }
            Ok(true) => tracing::debug!("capacity available; polling resumed"),
            Ok(false) => {}
            Err(err) => tracing::error!(error = %err, "failed to resume polling"),
        }
    }
}

fn merge(total: &mut DispatchReport, report: DispatchReport) {
    total.processed += report.processed;
    total.failed += report.failed;
    total.emitted += report.emitted;
}
