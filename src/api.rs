//! Collaborator boundary: the wire data model exchanged with the pipeline
//! store, the `PipelineApi` trait the consumer core depends on, the local
//! worker registry, and per-call metrics.

pub mod bundle;
pub mod client;
pub mod metrics;
pub mod registry;

pub use bundle::{
    Bundle, BundleQuery, ChannelSchemas, DataItem, DataItemWrite, InputItemRef, ItemQuery, Worker,
};
pub use client::{ApiOperation, MeteredApi, PipelineApi};
pub use metrics::ApiMetricsSnapshot;
pub use registry::{WorkerRegistry, DEFAULT_INPUT_CHANNEL};
