//! Core in-process plumbing: the multicast message sink, the typed event bus
//! and the fixed-rate task scheduler.

pub mod event_bus;
pub mod scheduler;
pub mod sink;

pub use event_bus::{BusEvent, EventBus};
pub use scheduler::TaskScheduler;
pub use sink::{MessageSink, Subscription, DEFAULT_SINK_CAPACITY};
