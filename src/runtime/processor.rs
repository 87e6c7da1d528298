use crate::prepare::PreparedInput;
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use indexmap::IndexMap;
use std::sync::Arc;

pub type ProcessFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Batch size used when a batch processor does not pick its own.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Data written to one output channel for one input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelOutput {
    /// Whether the item completes its flow. Unset means `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl ChannelOutput {
    pub fn new(data: Vec<Value>) -> Self {
        Self { done: None, data }
    }

    pub fn with_done(mut self, done: bool) -> Self {
        self.done = Some(done);
        self
    }

    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(true)
    }
}

/// Processor result for one input, keyed by output channel. Channels are
/// emitted in insertion order.
pub type ProcessorOutput = IndexMap<String, ChannelOutput>;

/// Business logic applied to one prepared input at a time.
///
/// Returning `Ok(None)` is a valid terminal outcome (a sink or filter): nothing
/// is emitted. Returning an error hands the bundle back to the store.
pub trait BundleProcessor: Send + Sync + 'static {
    fn process(&self, input: PreparedInput) -> ProcessFuture<Option<ProcessorOutput>>;
}

impl<F, Fut> BundleProcessor for F
where
    F: Fn(PreparedInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<ProcessorOutput>>> + Send + 'static,
{
    fn process(&self, input: PreparedInput) -> ProcessFuture<Option<ProcessorOutput>> {
        Box::pin(self(input))
    }
}

/// Business logic applied to up to [`BatchProcessor::max_batch_size`] inputs at once.
///
/// A returned sequence must line up one-to-one with the inputs; any other
/// length fails the whole batch.
pub trait BatchProcessor: Send + Sync + 'static {
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    fn process_batch(&self, inputs: Vec<PreparedInput>)
        -> ProcessFuture<Option<Vec<ProcessorOutput>>>;
}

/// The processor bound to an input stream's data event.
#[derive(Clone)]
pub enum Processor {
    Single(Arc<dyn BundleProcessor>),
    Batch(Arc<dyn BatchProcessor>),
}

impl Processor {
    pub fn single(processor: impl BundleProcessor) -> Self {
        Self::Single(Arc::new(processor))
    }

    pub fn batch(processor: impl BatchProcessor) -> Self {
        Self::Batch(Arc::new(processor))
    }

    /// Maximum number of inputs handed over per invocation.
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(processor) => processor.max_batch_size().max(1),
        }
    }
}

impl core::fmt::Debug for Processor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Processor::Single"),
            Self::Batch(processor) => write!(
                f,
                "Processor::Batch {{ max_batch_size: {} }}",
                processor.max_batch_size()
            ),
        }
    }
}
