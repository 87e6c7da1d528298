use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use pplns_stream::{
    Bundle, BundleQuery, DataItem, DataItemWrite, InputItemRef, ItemQuery, PipelineApi, Worker,
    WorkerRegistry,
};
use serde_json::Value;

/// Where a bundle is delivered: a consumer node within a task, optionally
/// owned by a registered worker.
#[derive(Debug, Clone)]
pub struct NodeAddress {
    pub node_id: String,
    pub task_id: String,
    pub worker_id: Option<String>,
}

impl NodeAddress {
    pub fn new(node_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            task_id: task_id.into(),
            worker_id: None,
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn query(&self) -> BundleQuery {
        BundleQuery::new(&self.node_id, &self.task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconsumeCall {
    pub task_id: String,
    pub bundle_id: String,
    pub consumption_id: String,
}

#[derive(Debug, Clone)]
pub struct EmitCall {
    pub query: ItemQuery,
    pub item: DataItemWrite,
}

#[derive(Clone)]
struct Link {
    target: NodeAddress,
    input_channel: String,
}

#[derive(Default)]
struct StoreState {
    bundles: Vec<Bundle>,
    links: HashMap<(String, String), Link>,
    fetches: Vec<BundleQuery>,
    unconsumed: Vec<UnconsumeCall>,
    emitted: Vec<EmitCall>,
    failing_fetches: VecDeque<String>,
    reject_emits: bool,
    fetch_delay: Option<Duration>,
    next_id: u64,
}

impl StoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn deliver(&mut self, target: &NodeAddress, channel: &str, item: DataItem) -> String {
        let bundle_id = self.next_id("bundle");
        self.bundles.push(Bundle {
            id: bundle_id.clone(),
            task_id: target.task_id.clone(),
            flow_id: "flow-1".into(),
            consumer_id: target.node_id.clone(),
            worker_id: target.worker_id.clone(),
            input_items: vec![InputItemRef {
                position: 0,
                input_channel: channel.to_owned(),
                item_id: item.id.clone(),
            }],
            items: vec![item],
            consumption_id: None,
        });
        bundle_id
    }
}

/// In-memory pipeline store that models claiming, releasing, and routing of
/// bundles, and records every call it receives.
#[derive(Clone, Default)]
pub struct MemoryPipeline {
    registry: Arc<WorkerRegistry>,
    state: Arc<Mutex<StoreState>>,
}

impl MemoryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api(&self) -> Arc<dyn PipelineApi> {
        Arc::new(self.clone())
    }

    pub fn register_worker(&self, worker: Worker) {
        self.registry.insert(worker);
    }

    /// Creates an item on `channel` and a bundle delivering it to `target`.
    /// Returns the bundle id.
    pub fn seed_item(&self, target: &NodeAddress, channel: &str, data: Vec<Value>) -> String {
        let mut state = self.lock();
        let item_id = state.next_id("item");
        state.deliver(target, channel, DataItem::new(item_id, data))
    }

    pub fn push_bundle(&self, bundle: Bundle) {
        self.lock().bundles.push(bundle);
    }

    /// Routes items emitted by `from_node` on `output_channel` into new bundles for `target`.
    pub fn link(&self, from_node: &str, output_channel: &str, target: NodeAddress, input_channel: &str) {
        self.lock().links.insert(
            (from_node.to_owned(), output_channel.to_owned()),
            Link {
                target,
                input_channel: input_channel.to_owned(),
            },
        );
    }

    pub fn fail_next_fetch(&self, message: impl Into<String>) {
        self.lock().failing_fetches.push_back(message.into());
    }

    /// Makes every fetch take `delay` before it claims anything.
    pub fn delay_fetches(&self, delay: Duration) {
        self.lock().fetch_delay = Some(delay);
    }

    pub fn reject_emits(&self, reject: bool) {
        self.lock().reject_emits = reject;
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches.len()
    }

    pub fn unconsumed(&self) -> Vec<UnconsumeCall> {
        self.lock().unconsumed.clone()
    }

    pub fn emitted(&self) -> Vec<EmitCall> {
        self.lock().emitted.clone()
    }

    /// Bundles addressed to `node_id` that nobody has claimed.
    pub fn available(&self, node_id: &str) -> usize {
        self.lock()
            .bundles
            .iter()
            .filter(|bundle| bundle.consumer_id == node_id && bundle.consumption_id.is_none())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("memory store poisoned")
    }
}

fn matches(bundle: &Bundle, query: &BundleQuery) -> bool {
    bundle.consumer_id == query.consumer_id
        && bundle.task_id == query.task_id
        && query
            .worker_id
            .as_ref()
            .map_or(true, |worker_id| bundle.worker_id.as_ref() == Some(worker_id))
        && query
            .flow_id
            .as_ref()
            .map_or(true, |flow_id| &bundle.flow_id == flow_id)
}

impl PipelineApi for MemoryPipeline {
    fn fetch_bundles<'a>(&'a self, query: &'a BundleQuery) -> BoxFuture<'a, Result<Vec<Bundle>>> {
        Box::pin(async move {
            let delay = self.lock().fetch_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.lock();
            state.fetches.push(query.clone());
            if let Some(message) = state.failing_fetches.pop_front() {
                bail!("{message}");
            }

            let limit = query.limit.unwrap_or(usize::MAX);
            let consume = query.consume.unwrap_or(false);
            let StoreState {
                bundles, next_id, ..
            } = &mut *state;

            let mut page = Vec::new();
            for bundle in bundles.iter_mut() {
                if page.len() >= limit {
                    break;
                }
                if bundle.consumption_id.is_some() || !matches(bundle, query) {
                    continue;
                }
                if consume {
                    *next_id += 1;
                    bundle.consumption_id = Some(format!("consumption-{next_id}"));
                }
                page.push(bundle.clone());
            }
            Ok(page)
        })
    }

    fn unconsume<'a>(
        &'a self,
        task_id: &'a str,
        bundle_id: &'a str,
        consumption_id: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.unconsumed.push(UnconsumeCall {
                task_id: task_id.to_owned(),
                bundle_id: bundle_id.to_owned(),
                consumption_id: consumption_id.to_owned(),
            });
            if let Some(bundle) = state.bundles.iter_mut().find(|bundle| {
                bundle.id == bundle_id
                    && bundle.task_id == task_id
                    && bundle.consumption_id.as_deref() == Some(consumption_id)
            }) {
                bundle.consumption_id = None;
            }
            Ok(())
        })
    }

    fn emit_item<'a>(
        &'a self,
        query: &'a ItemQuery,
        item: DataItemWrite,
    ) -> BoxFuture<'a, Result<DataItem>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.reject_emits {
                bail!("emit rejected for node {}", query.node_id);
            }
            state.emitted.push(EmitCall {
                query: query.clone(),
                item: item.clone(),
            });

            let created = DataItem::new(state.next_id("item"), item.data);
            let link = state
                .links
                .get(&(query.node_id.clone(), item.output_channel.clone()))
                .cloned();
            if let Some(link) = link {
                state.deliver(&link.target, &link.input_channel, created.clone());
            }
            Ok(created)
        })
    }

    fn lookup_worker(&self, worker_id: Option<&str>) -> Result<Worker> {
        self.registry.lookup(worker_id)
    }
}
