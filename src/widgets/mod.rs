//! UI-side selection: axis views and the adapter mirroring them into the core selection.

pub mod axis_view;
pub mod view_selection;

pub use axis_view::{AxisView, AxisViewProvider, AxisViewRef, DeletionSignal, MixerStrip, ViewId, ViewRegistry};
pub use view_selection::SelectionViewAdapter;
