//! Per-window view of the core selection.
//!
//! Tracks which axis views are highlighted so `selected(view)` is a local
//! lookup. Stays in step with `CoreSelection` by listening to its change
//! events, and deselects views that announce their own destruction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexSet;
use log::{debug, trace};
use uuid::Uuid;

use super::axis_view::{AxisView, AxisViewProvider, AxisViewRef, ConnectionId, DeletedView, ViewId};
use crate::core::event_bus::SubscriptionId;
use crate::core::selection::CoreSelection;
use crate::core::selection_events::{Property, PropertyChange};
use crate::core::weak_ref::WeakRef;
use crate::entities::Stripable;

struct TrackedView {
    stripable: WeakRef<dyn Stripable>,
    /// Deletion-signal connection, with the view needed to revoke it
    connection: Option<(Weak<dyn AxisView>, ConnectionId)>,
}

#[derive(Default)]
struct Tracked {
    axes: HashMap<ViewId, TrackedView>,
    processors: IndexSet<Uuid>,
}

struct Shared {
    core: Arc<CoreSelection>,
    provider: Arc<dyn AxisViewProvider>,
    tracked: Mutex<Tracked>,
}

/// Mirrors axis views into and out of a `CoreSelection`.
pub struct SelectionViewAdapter {
    shared: Arc<Shared>,
    change_subscription: SubscriptionId,
}

fn disconnect(connection: Option<(Weak<dyn AxisView>, ConnectionId)>) {
    let Some((view, id)) = connection else {
        return;
    };
    if let Some(view) = view.upgrade() {
        if let Some(signal) = view.deletion_signal() {
            signal.disconnect(id);
        }
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking `view`. Returns false if it already was tracked.
    fn track(self: &Arc<Self>, view: &AxisViewRef) -> bool {
        let id = view.view_id();
        {
            let mut tracked = self.lock();
            if tracked.axes.contains_key(&id) {
                return false;
            }
            tracked.axes.insert(
                id,
                TrackedView {
                    stripable: WeakRef::from_option(view.stripable().as_ref()),
                    connection: None,
                },
            );
        }

        if let Some(signal) = view.deletion_signal() {
            let weak = Arc::downgrade(self);
            let conn = signal.connect(move |deleted| {
                if let Some(shared) = weak.upgrade() {
                    shared.view_deleted(deleted);
                }
            });

            let stale = {
                let mut tracked = self.lock();
                match tracked.axes.get_mut(&id) {
                    Some(entry) => {
                        entry.connection = Some((Arc::downgrade(view), conn));
                        false
                    }
                    None => true,
                }
            };
            if stale {
                signal.disconnect(conn);
            }
        }
        true
    }

    fn view_deleted(&self, deleted: &DeletedView) {
        trace!("axis view {:?} deleted", deleted.id);
        // The view is being destroyed, its signal goes with it
        self.lock().axes.remove(&deleted.id);
        self.core.remove(deleted.stripable.as_ref(), None);
    }

    fn untrack_all(&self) {
        let dropped: Vec<TrackedView> = self.lock().axes.drain().map(|(_, v)| v).collect();
        for view in dropped {
            disconnect(view.connection);
        }
    }

    fn sync(self: &Arc<Self>, what: &PropertyChange) {
        if !what.contains(Property::Selected) {
            return;
        }

        let selected: Vec<_> = self
            .core
            .get_stripables()
            .into_iter()
            .filter(|sc| sc.controllable.is_none())
            .filter_map(|sc| sc.stripable)
            .filter(|s| self.core.selected_stripable(s))
            .collect();

        let dropped: Vec<TrackedView> = {
            let mut tracked = self.lock();
            let gone: Vec<ViewId> = tracked
                .axes
                .iter()
                .filter(|(_, view)| {
                    !view
                        .stripable
                        .upgrade()
                        .is_some_and(|s| self.core.selected_stripable(&s))
                })
                .map(|(id, _)| *id)
                .collect();
            gone.iter().filter_map(|id| tracked.axes.remove(id)).collect()
        };
        if !dropped.is_empty() {
            debug!("{} axis views left the selection", dropped.len());
        }
        for view in dropped {
            disconnect(view.connection);
        }

        for stripable in &selected {
            let shown = self
                .lock()
                .axes
                .values()
                .any(|view| view.stripable.points_to(stripable));
            if shown {
                continue;
            }
            if let Some(view) = self.provider.axis_view_by_stripable(stripable) {
                if self.track(&view) {
                    debug!("tracking axis view for {}", stripable.name());
                }
            }
        }
    }
}

impl SelectionViewAdapter {
    pub fn new(core: Arc<CoreSelection>, provider: Arc<dyn AxisViewProvider>) -> Self {
        let shared = Arc::new(Shared {
            core: Arc::clone(&core),
            provider,
            tracked: Mutex::new(Tracked::default()),
        });

        let weak = Arc::downgrade(&shared);
        let change_subscription = core.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.sync(&event.what);
            }
        });

        Self { shared, change_subscription }
    }

    pub fn core(&self) -> &Arc<CoreSelection> {
        &self.shared.core
    }

    /// Select the view's stripable, tracking the view and its destruction.
    ///
    /// The core is updated before the view is tracked, so a change event
    /// arriving in between cannot drop a view whose stripable is not yet
    /// selected.
    pub fn add(&self, view: &AxisViewRef) {
        self.shared.core.add(view.stripable().as_ref(), None);
        self.shared.track(view);
    }

    /// Deselect the view's stripable. Local tracking follows through the
    /// resulting change event.
    pub fn remove(&self, view: &dyn AxisView) {
        self.shared.core.remove(view.stripable().as_ref(), None);
    }

    /// Make the view's stripable the only selected one.
    pub fn set(&self, view: &AxisViewRef) {
        self.shared.core.set(view.stripable().as_ref(), None);
        self.shared.track(view);
    }

    pub fn selected(&self, view: &dyn AxisView) -> bool {
        self.shared.lock().axes.contains_key(&view.view_id())
    }

    /// Tracked view ids, in no particular order
    pub fn axes(&self) -> Vec<ViewId> {
        self.shared.lock().axes.keys().copied().collect()
    }

    pub fn clear(&self) {
        self.clear_processors();
        self.clear_routes();
    }

    /// Drop all view tracking and clear the core stripable selection,
    /// sending one change notification at most.
    pub fn clear_routes(&self) {
        self.shared.untrack_all();
        let _suspend = self.shared.core.suspend_changes();
        self.shared.core.clear_stripables();
    }

    pub fn empty(&self) -> bool {
        let tracked = self.shared.lock();
        tracked.processors.is_empty() && tracked.axes.is_empty()
    }

    /// React to a presentation property broadcast.
    pub fn presentation_info_changed(&self, what: &PropertyChange) {
        self.shared.sync(what);
    }

    // ========== Processors ==========

    pub fn add_processor(&self, id: Uuid) -> bool {
        self.shared.lock().processors.insert(id)
    }

    pub fn remove_processor(&self, id: Uuid) -> bool {
        self.shared.lock().processors.shift_remove(&id)
    }

    pub fn processors(&self) -> Vec<Uuid> {
        self.shared.lock().processors.iter().copied().collect()
    }

    pub fn clear_processors(&self) {
        self.shared.lock().processors.clear();
    }
}

impl Drop for SelectionViewAdapter {
    fn drop(&mut self) {
        self.shared.core.unsubscribe(self.change_subscription);
        self.shared.untrack_all();
    }
}
