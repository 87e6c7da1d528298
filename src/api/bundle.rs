//! Data shapes owned by the remote pipeline store. Field names follow the
//! store's JSON representation so the types can be fed straight from an HTTP
//! response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel name to schema mapping, in declaration order.
pub type ChannelSchemas = Map<String, Value>;

/// Reference from a bundle to one of its items, tagged with the input slot it fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputItemRef {
    pub position: i64,
    pub input_channel: String,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItem {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_stack: Option<Vec<Value>>,
}

impl DataItem {
    pub fn new(id: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            data,
            flow_stack: None,
        }
    }

    pub fn with_flow_stack(mut self, flow_stack: Vec<Value>) -> Self {
        self.flow_stack = Some(flow_stack);
        self
    }

    /// Depth of the item's flow stack; a missing stack counts as empty.
    pub fn flow_depth(&self) -> usize {
        self.flow_stack.as_ref().map_or(0, Vec::len)
    }
}

/// A claimable grouping of input items destined for one consumer node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(rename = "_id")]
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub flow_id: String,
    pub consumer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub input_items: Vec<InputItemRef>,
    #[serde(default)]
    pub items: Vec<DataItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption_id: Option<String>,
}

impl Bundle {
    /// Whether the store has marked this bundle as claimed.
    pub fn is_consumed(&self) -> bool {
        self.consumption_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Worker {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub inputs: ChannelSchemas,
    #[serde(default)]
    pub outputs: ChannelSchemas,
}

impl Worker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, channel: impl Into<String>) -> Self {
        self.inputs.insert(channel.into(), Value::Object(Map::new()));
        self
    }

    pub fn with_output(mut self, channel: impl Into<String>) -> Self {
        self.outputs.insert(channel.into(), Value::Object(Map::new()));
        self
    }

    /// Input channel names in declaration order.
    pub fn input_channels(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }
}

/// Filter sent to the store when fetching bundles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleQuery {
    pub consumer_id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consume: Option<bool>,
}

impl BundleQuery {
    /// Query for bundles of `consumer_id` within `task_id`, claiming them on fetch.
    pub fn new(consumer_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            task_id: task_id.into(),
            consume: Some(true),
            ..Self::default()
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_flow(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn consume(mut self, consume: bool) -> Self {
        self.consume = Some(consume);
        self
    }
}

/// Addresses the node and task an emitted item belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuery {
    pub node_id: String,
    pub task_id: String,
}

/// Item write request tying processor output to the consumption it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItemWrite {
    pub output_channel: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption_id: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}
