//! Synchronous publish/subscribe channels for link lifecycle events.

mod bus;

pub use bus::{BusEvent, Channel, EventBus, LinkEvent};
