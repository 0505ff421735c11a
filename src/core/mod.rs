//! Core selection engine - registry, weak references, change events
//!
//! These modules are independent of any UI.

pub mod event_bus;
pub mod selection;
pub mod selection_events;
pub mod weak_ref;

// Re-exports for convenience
pub use event_bus::{EventBus, EventEmitter, SubscriptionId};
pub use selection::{ChangeSuspender, CoreSelection, StripableControllable};
pub use selection_events::{Property, PropertyChange, SelectionChangedEvent};
pub use weak_ref::{EntityId, RefState, WeakRef};
