pub mod api;
pub mod prepare;
pub mod runtime;
pub mod stream;

pub use api::{
    ApiMetricsSnapshot, ApiOperation, Bundle, BundleQuery, DataItem, DataItemWrite, InputItemRef,
    ItemQuery, MeteredApi, PipelineApi, Worker, WorkerRegistry,
};
pub use prepare::{prepare_bundle, InputReceipt, PreparedInput};
pub use runtime::config::{PollingMode, StreamConfig, StreamConfigBuilder, StreamConfigParams};
pub use runtime::error::{ConfigurationError, DataIntegrityError, StreamError};
pub use runtime::processor::{
    BatchProcessor, BundleProcessor, ChannelOutput, ProcessFuture, Processor, ProcessorOutput,
};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use stream::{BoundedGate, InputStream, SchedulerState};
