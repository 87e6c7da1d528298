//! Normalization of raw bundles into processor input: item ordering by
//! position, channel assignment from the owning worker, and flow-stack
//! selection.

pub mod bundle;
pub mod input;

pub use bundle::{deepest_flow_stack, prepare_bundle};
pub use input::{InputReceipt, PreparedInput};
