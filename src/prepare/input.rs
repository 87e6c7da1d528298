use crate::api::{Bundle, DataItem, ItemQuery};
use serde_json::Value;
use indexmap::IndexMap;

/// Processor input built from one bundle.
///
/// Built fresh on every poll and handed over by value, so a processor is the
/// only owner of it once invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInput {
    pub bundle_id: String,
    pub task_id: String,
    pub flow_id: String,
    pub consumer_id: String,
    /// Deepest flow stack among the bundle's items.
    pub flow_stack: Vec<Value>,
    /// Items keyed by the worker input channel they fill, in the worker's
    /// channel declaration order.
    pub inputs: IndexMap<String, DataItem>,
    pub bundle: Bundle,
}

impl PreparedInput {
    pub fn input(&self, channel: &str) -> Option<&DataItem> {
        self.inputs.get(channel)
    }

    pub fn consumption_id(&self) -> Option<&str> {
        self.bundle.consumption_id.as_deref()
    }

    /// Bookkeeping the dispatcher keeps after the input itself moves into a processor.
    pub fn receipt(&self) -> InputReceipt {
        InputReceipt {
            bundle_id: self.bundle_id.clone(),
            task_id: self.task_id.clone(),
            consumer_id: self.consumer_id.clone(),
            consumption_id: self.bundle.consumption_id.clone(),
        }
    }
}

/// Identifies the bundle behind an input for emit and unconsume calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReceipt {
    pub bundle_id: String,
    pub task_id: String,
    pub consumer_id: String,
    pub consumption_id: Option<String>,
}

impl InputReceipt {
    pub fn from_bundle(bundle: &Bundle) -> Self {
        Self {
            bundle_id: bundle.id.clone(),
            task_id: bundle.task_id.clone(),
            consumer_id: bundle.consumer_id.clone(),
            consumption_id: bundle.consumption_id.clone(),
        }
    }

    /// Address for items emitted on behalf of this input.
    pub fn item_query(&self) -> ItemQuery {
        ItemQuery {
            node_id: self.consumer_id.clone(),
            task_id: self.task_id.clone(),
        }
    }
}
