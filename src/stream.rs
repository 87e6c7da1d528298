//! Stream machinery: event slots, the admission gate, the poll scheduler, the
//! processor dispatcher, and the `InputStream` that ties them together.

pub mod dispatch;
pub mod events;
pub mod gate;
pub mod input;
mod lifecycle;
pub mod scheduler;

pub use dispatch::{DispatchReport, Dispatcher};
pub use events::{EventBus, HandlerList};
pub use gate::{BoundedGate, GatePermit};
pub use input::InputStream;
pub use scheduler::{Scheduler, SchedulerState, TickAction};
