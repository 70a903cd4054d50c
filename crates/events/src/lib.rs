//! Change notifications and the pub/sub mechanics that carry them.

pub mod bus;
pub mod change;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use change::{ChangeEvent, ChangeKind, RegionScoped};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
