//! Axis views: on-screen widgets that represent one stripable.
//!
//! Views may expose a deletion signal. Listeners connected to it are told
//! when the view is destroyed, with enough data to deselect what it showed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::trace;
use uuid::Uuid;

use crate::entities::StripableRef;

/// Identifier of a view widget
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewId(pub Uuid);

impl ViewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewId {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of a deletion signal.
#[derive(Clone, Debug)]
pub struct DeletedView {
    pub id: ViewId,
    pub stripable: Option<StripableRef>,
}

/// Handle for one deletion-signal connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

type Slot = Arc<dyn Fn(&DeletedView) + Send + Sync>;

/// Fired once, from the view's destructor.
#[derive(Default)]
pub struct DeletionSignal {
    slots: Mutex<Vec<(ConnectionId, Slot)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for DeletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionSignal")
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl DeletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&DeletedView) + Send + Sync + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(slot)));
        id
    }

    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    pub fn connection_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Call every connected slot. Slots are invoked outside the lock.
    pub fn emit(&self, deleted: &DeletedView) {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();
        for slot in slots {
            slot(deleted);
        }
    }
}

/// A widget representing a stripable.
pub trait AxisView: Send + Sync {
    fn view_id(&self) -> ViewId;

    fn stripable(&self) -> Option<StripableRef>;

    /// Views that announce their destruction return their signal here.
    fn deletion_signal(&self) -> Option<&DeletionSignal> {
        None
    }
}

pub type AxisViewRef = Arc<dyn AxisView>;

/// Looks up the view that currently shows a stripable.
pub trait AxisViewProvider: Send + Sync {
    fn axis_view_by_stripable(&self, stripable: &StripableRef) -> Option<AxisViewRef>;
}

/// Mixer window strip. Emits its deletion signal when dropped.
pub struct MixerStrip {
    id: ViewId,
    stripable: StripableRef,
    catch_deletion: DeletionSignal,
}

impl MixerStrip {
    pub fn new(stripable: StripableRef) -> Arc<Self> {
        Arc::new(Self {
            id: ViewId::new(),
            stripable,
            catch_deletion: DeletionSignal::new(),
        })
    }
}

impl AxisView for MixerStrip {
    fn view_id(&self) -> ViewId {
        self.id
    }

    fn stripable(&self) -> Option<StripableRef> {
        Some(Arc::clone(&self.stripable))
    }

    fn deletion_signal(&self) -> Option<&DeletionSignal> {
        Some(&self.catch_deletion)
    }
}

impl Drop for MixerStrip {
    fn drop(&mut self) {
        trace!("mixer strip for {} going away", self.stripable.name());
        self.catch_deletion.emit(&DeletedView {
            id: self.id,
            stripable: Some(Arc::clone(&self.stripable)),
        });
    }
}

/// Provider backed by a list of registered views. Holds them weakly.
#[derive(Default)]
pub struct ViewRegistry {
    views: Mutex<Vec<Weak<dyn AxisView>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, view: &AxisViewRef) {
        let mut views = self.views.lock().unwrap_or_else(|e| e.into_inner());
        views.retain(|v| v.strong_count() > 0);
        views.push(Arc::downgrade(view));
    }

    pub fn len(&self) -> usize {
        self.views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|v| v.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AxisViewProvider for ViewRegistry {
    fn axis_view_by_stripable(&self, stripable: &StripableRef) -> Option<AxisViewRef> {
        let candidates: Vec<AxisViewRef> = self
            .views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        candidates.into_iter().find(|view| {
            view.stripable()
                .is_some_and(|s| std::ptr::addr_eq(Arc::as_ptr(&s), Arc::as_ptr(stripable)))
        })
    }
}
