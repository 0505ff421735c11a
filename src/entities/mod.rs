//! Entities the selection points at.
//!
//! Owned by the session; the selection layer only keeps weak references.

pub mod stripable;

pub use stripable::{Control, Controllable, ControllableRef, Strip, Stripable, StripableRef};
