//! The collaborator contract the consumer core depends on, plus a metering
//! wrapper that records latency and failures for every call it forwards.
//!
//! Transport concerns (URL construction, JSON encoding, authentication) belong
//! to implementors of [`PipelineApi`]; the core only sees these four calls.

use crate::api::bundle::{Bundle, BundleQuery, DataItem, DataItemWrite, ItemQuery, Worker};
use crate::api::metrics::{ApiMetrics, ApiMetricsSnapshot};
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Names the collaborator call an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    FetchBundles,
    LookupWorker,
    Unconsume,
    EmitItem,
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApiOperation::FetchBundles => "fetch_bundles",
            ApiOperation::LookupWorker => "lookup_worker",
            ApiOperation::Unconsume => "unconsume",
            ApiOperation::EmitItem => "emit_item",
        };
        f.write_str(name)
    }
}

/// Remote pipeline store as seen by an input stream.
pub trait PipelineApi: Send + Sync + 'static {
    /// Returns bundles matching `query`; an empty page is not an error.
    fn fetch_bundles<'a>(&'a self, query: &'a BundleQuery) -> BoxFuture<'a, Result<Vec<Bundle>>>;

    /// Releases a claimed bundle so the store can offer it again.
    fn unconsume<'a>(
        &'a self,
        task_id: &'a str,
        bundle_id: &'a str,
        consumption_id: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Writes one output item for the node and task addressed by `query`.
    fn emit_item<'a>(
        &'a self,
        query: &'a ItemQuery,
        item: DataItemWrite,
    ) -> BoxFuture<'a, Result<DataItem>>;

    /// Resolves the worker that owns a bundle. `None` yields the synthetic
    /// single-input worker used by internal source workers.
    fn lookup_worker(&self, worker_id: Option<&str>) -> Result<Worker>;
}

impl<T: PipelineApi + ?Sized> PipelineApi for Arc<T> {
    fn fetch_bundles<'a>(&'a self, query: &'a BundleQuery) -> BoxFuture<'a, Result<Vec<Bundle>>> {
        (**self).fetch_bundles(query)
    }

    fn unconsume<'a>(
        &'a self,
        task_id: &'a str,
        bundle_id: &'a str,
        consumption_id: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        (**self).unconsume(task_id, bundle_id, consumption_id)
    }

    fn emit_item<'a>(
        &'a self,
        query: &'a ItemQuery,
        item: DataItemWrite,
    ) -> BoxFuture<'a, Result<DataItem>> {
        (**self).emit_item(query, item)
    }

    fn lookup_worker(&self, worker_id: Option<&str>) -> Result<Worker> {
        (**self).lookup_worker(worker_id)
    }
}

/// Forwards every call to an inner collaborator and records its outcome.
#[derive(Clone)]
pub struct MeteredApi {
    inner: Arc<dyn PipelineApi>,
    metrics: Arc<ApiMetrics>,
}

impl MeteredApi {
    pub fn new(inner: Arc<dyn PipelineApi>) -> Self {
        Self {
            inner,
            metrics: Arc::new(ApiMetrics::default()),
        }
    }

    pub fn metrics(&self) -> ApiMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn measure<T, Fut>(&self, operation: ApiOperation, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        let latency = started.elapsed();
        match &result {
            Ok(_) => self.metrics.record_success(latency),
            Err(err) => {
                self.metrics.record_failure(latency);
                tracing::debug!(%operation, error = %err, "pipeline api call failed");
            }
        }
        result
    }
}

impl PipelineApi for MeteredApi {
    fn fetch_bundles<'a>(&'a self, query: &'a BundleQuery) -> BoxFuture<'a, Result<Vec<Bundle>>> {
        Box::pin(self.measure(ApiOperation::FetchBundles, self.inner.fetch_bundles(query)))
    }

    fn unconsume<'a>(
        &'a self,
        task_id: &'a str,
        bundle_id: &'a str,
        consumption_id: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.measure(
            ApiOperation::Unconsume,
            self.inner.unconsume(task_id, bundle_id, consumption_id),
        ))
    }

    fn emit_item<'a>(
        &'a self,
        query: &'a ItemQuery,
        item: DataItemWrite,
    ) -> BoxFuture<'a, Result<DataItem>> {
        Box::pin(self.measure(ApiOperation::EmitItem, self.inner.emit_item(query, item)))
    }

    fn lookup_worker(&self, worker_id: Option<&str>) -> Result<Worker> {
        self.inner.lookup_worker(worker_id)
    }
}
