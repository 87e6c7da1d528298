use crate::api::ApiOperation;
use anyhow::Error as AnyError;

/// Stream misconfiguration detected before or at start-up. Never recovered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("input stream can only have one data handler")]
    DuplicateDataHandler,
    #[error("input stream has no data handler")]
    MissingDataHandler,
    #[error("input stream is closed")]
    StreamClosed,
}

/// Bundle content that contradicts what the store promised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataIntegrityError {
    #[error("bundle {bundle_id} references item {item_id} which it does not contain")]
    MissingItem { bundle_id: String, item_id: String },
    #[error("bundle {bundle_id} carries {items} input items but its worker declares {channels} input channels")]
    ChannelCountMismatch {
        bundle_id: String,
        channels: usize,
        items: usize,
    },
    #[error("cannot emit for bundle {bundle_id} because it has not been consumed")]
    MissingConsumption { bundle_id: String },
    #[error("processor returned {outputs} outputs for {inputs} inputs")]
    BatchLengthMismatch { outputs: usize, inputs: usize },
}

/// Everything a stream can report through its error event.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
    #[error("pipeline api {operation} failed: {source:#}")]
    Collaborator {
        operation: ApiOperation,
        #[source]
        source: AnyError,
    },
    #[error("processor failed: {0:#}")]
    Processor(#[source] AnyError),
}

impl StreamError {
    pub fn collaborator(operation: ApiOperation, source: AnyError) -> Self {
        Self::Collaborator { operation, source }
    }

    /// Collaborator call the error originated from, if any.
    pub fn operation(&self) -> Option<ApiOperation> {
        match self {
            Self::Collaborator { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
