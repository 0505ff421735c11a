//! stripsel - mixer selection registry
//!
//! Thread-safe selection of stripables and controls, plus the UI adapter
//! that mirrors it onto axis views.

// Core engine (registry, events, weak references)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod entities;
pub mod script;
pub mod widgets;

// Re-export commonly used types from core
pub use crate::core::event_bus::{downcast_event, BoxedEvent, EventBus};
pub use crate::core::selection::{CoreSelection, StripableControllable};
pub use crate::core::selection_events::{Property, PropertyChange, SelectionChangedEvent};

// Re-export entities
pub use entities::{Controllable, Stripable, Strip};
pub use widgets::SelectionViewAdapter;
