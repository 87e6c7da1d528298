use super::input::PreparedInput;
use crate::api::{Bundle, DataItem, InputItemRef, Worker};
use crate::runtime::error::DataIntegrityError;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;

/// Builds processor input from `bundle`, assigning its items to the worker's
/// input channels.
///
/// Item references are ordered by position and matched against the worker's
/// channels in declaration order. A reference to an item the bundle does not
/// carry, or a reference count that differs from the channel count, is
/// rejected instead of dropping or padding channels.
pub fn prepare_bundle(
    worker: &Worker,
    bundle: Bundle,
) -> Result<PreparedInput, DataIntegrityError> {
    let mut refs: Vec<&InputItemRef> = bundle.input_items.iter().collect();
    refs.sort_by_key(|item_ref| item_ref.position);

    let mut items_by_id: HashMap<&str, &DataItem> = HashMap::with_capacity(bundle.items.len());
    for item in &bundle.items {
        items_by_id.entry(item.id.as_str()).or_insert(item);
    }

    let mut ordered_items = Vec::with_capacity(refs.len());
    for item_ref in &refs {
        let item = items_by_id.get(item_ref.item_id.as_str()).ok_or_else(|| {
            DataIntegrityError::MissingItem {
                bundle_id: bundle.id.clone(),
                item_id: item_ref.item_id.clone(),
            }
        })?;
        ordered_items.push(*item);
    }

    let channels = worker.inputs.len();
    if channels != ordered_items.len() {
        return Err(DataIntegrityError::ChannelCountMismatch {
            bundle_id: bundle.id.clone(),
            channels,
            items: ordered_items.len(),
        });
    }

    let inputs: IndexMap<String, DataItem> = worker
        .input_channels()
        .zip(ordered_items)
        .map(|(channel, item)| (channel.to_owned(), item.clone()))
        .collect();
    let flow_stack = deepest_flow_stack(&bundle.items);

    Ok(PreparedInput {
        bundle_id: bundle.id.clone(),
        task_id: bundle.task_id.clone(),
        flow_id: bundle.flow_id.clone(),
        consumer_id: bundle.consumer_id.clone(),
        flow_stack,
        inputs,
        bundle,
    })
}

/// Flow stack of the item with the longest stack; the first such item wins a tie.
pub fn deepest_flow_stack(items: &[DataItem]) -> Vec<Value> {
    let mut deepest: Option<&DataItem> = None;
    for item in items {
        match deepest {
            Some(current) if current.flow_depth() >= item.flow_depth() => {}
            _ => deepest = Some(item),
        }
    }

    deepest
        .and_then(|item| item.flow_stack.clone())
        .unwrap_or_default()
}
