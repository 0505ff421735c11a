//! Core selection registry: which stripables and controls are selected.
//!
//! Entries are keyed by the identity of their (stripable, controllable) pair
//! and carry an insertion order from a process-wide counter. The registry only
//! holds weak references; entries whose targets all died are skipped by reads
//! and swept by the next write (`add`, `remove`, `set`) or by `prune()`.
//!
//! Writers decide whether anything changed while holding the write lock and
//! emit `SelectionChangedEvent` after releasing it, never on a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use indexmap::IndexMap;
use log::{debug, trace};

use super::event_bus::{EventBus, SubscriptionId};
use super::selection_events::SelectionChangedEvent;
use super::weak_ref::{EntityId, WeakRef};
use crate::entities::{ControllableRef, Stripable, StripableRef, Controllable};

/// Process-wide selection order. Shared by every `CoreSelection` so that
/// orders are unique across registries and concurrent writers.
static SELECTION_ORDER: AtomicU64 = AtomicU64::new(0);

fn next_order() -> u64 {
    SELECTION_ORDER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EntryKey {
    stripable: Option<EntityId>,
    controllable: Option<EntityId>,
}

impl EntryKey {
    fn new(s: Option<&StripableRef>, c: Option<&ControllableRef>) -> Self {
        Self { stripable: s.map(EntityId::of), controllable: c.map(EntityId::of) }
    }
}

struct SelectedStripable {
    stripable: WeakRef<dyn Stripable>,
    controllable: WeakRef<dyn Controllable>,
    order: u64,
}

impl SelectedStripable {
    fn new(s: Option<&StripableRef>, c: Option<&ControllableRef>) -> Self {
        Self {
            stripable: WeakRef::from_option(s),
            controllable: WeakRef::from_option(c),
            order: next_order(),
        }
    }

    fn is_dead(&self) -> bool {
        !self.stripable.is_live() && !self.controllable.is_live()
    }
}

/// Snapshot item returned by `CoreSelection::get_stripables`.
#[derive(Clone, Debug)]
pub struct StripableControllable {
    pub stripable: Option<StripableRef>,
    pub controllable: Option<ControllableRef>,
    pub order: u64,
}

#[derive(Default)]
struct SuspendState {
    depth: usize,
    pending: bool,
}

/// Thread-safe selection of stripables and controllables.
pub struct CoreSelection {
    stripables: RwLock<IndexMap<EntryKey, SelectedStripable>>,
    events: EventBus,
    suspend: Mutex<SuspendState>,
}

impl Default for CoreSelection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CoreSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSelection")
            .field("entries", &self.len())
            .field("events", &self.events)
            .finish()
    }
}

/// Drop dead entries under a write lock the caller already holds.
fn sweep(entries: &mut IndexMap<EntryKey, SelectedStripable>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_dead());
    before - entries.len()
}

fn describe(s: Option<&StripableRef>, c: Option<&ControllableRef>) -> String {
    format!(
        "{}/{}",
        s.map_or("-", |s| s.name()),
        c.map_or("-", |c| c.name())
    )
}

impl CoreSelection {
    pub fn new() -> Self {
        Self::with_events(EventBus::new())
    }

    /// Registry that broadcasts on an existing bus.
    pub fn with_events(events: EventBus) -> Self {
        Self {
            stripables: RwLock::new(IndexMap::new()),
            events,
            suspend: Mutex::new(SuspendState::default()),
        }
    }

    // ========== Mutation ==========

    /// Select `c` if given and selected or `s` if selected as a plain stripable,
    /// otherwise deselect. The check and the write are two separate lock epochs.
    pub fn toggle(&self, s: Option<&StripableRef>, c: Option<&ControllableRef>) {
        let c_selected = c.is_some_and(|c| self.selected_controllable(c));
        let s_selected = s.is_some_and(|s| self.selected_stripable(s));
        trace!(
            "toggle: s {} selected {} c {} selected {}",
            s.map_or("-", |s| s.name()),
            s_selected,
            c.map_or("-", |c| c.name()),
            c_selected
        );
        if c_selected || s_selected {
            self.remove(s, c);
        } else {
            self.add(s, c);
        }
    }

    pub fn add(&self, s: Option<&StripableRef>, c: Option<&ControllableRef>) {
        if s.is_none() && c.is_none() {
            trace!("add: nothing to select");
            return;
        }

        let key = EntryKey::new(s, c);
        let send = {
            let mut entries = self.stripables.write().unwrap_or_else(|e| e.into_inner());
            sweep(&mut entries);
            if entries.contains_key(&key) {
                debug!("{} already in s/c selection", describe(s, c));
                false
            } else {
                entries.insert(key, SelectedStripable::new(s, c));
                debug!("added {} to s/c selection", describe(s, c));
                true
            }
        };

        if send {
            self.send_selection_change();
        }
    }

    pub fn remove(&self, s: Option<&StripableRef>, c: Option<&ControllableRef>) {
        let key = EntryKey::new(s, c);
        let send = {
            let mut entries = self.stripables.write().unwrap_or_else(|e| e.into_inner());
            sweep(&mut entries);
            entries.shift_remove(&key).is_some()
        };

        if send {
            debug!("removed {} from s/c selection", describe(s, c));
            self.send_selection_change();
        }
    }

    /// Replace the whole selection with `(s, c)`.
    ///
    /// No-op if that pair already is the only entry. Setting `(None, None)`
    /// clears the selection.
    pub fn set(&self, s: Option<&StripableRef>, c: Option<&ControllableRef>) {
        if s.is_none() && c.is_none() {
            self.clear_stripables();
            return;
        }

        let key = EntryKey::new(s, c);
        {
            let mut entries = self.stripables.write().unwrap_or_else(|e| e.into_inner());
            sweep(&mut entries);
            if entries.len() == 1 && entries.contains_key(&key) {
                debug!("{} already selected", describe(s, c));
                return;
            }
            entries.clear();
            entries.insert(key, SelectedStripable::new(s, c));
        }

        debug!("set s/c selection to {}", describe(s, c));
        self.send_selection_change();
    }

    pub fn clear_stripables(&self) {
        trace!("clearing s/c selection");
        let send = {
            let mut entries = self.stripables.write().unwrap_or_else(|e| e.into_inner());
            if entries.is_empty() {
                false
            } else {
                entries.clear();
                true
            }
        };

        if send {
            debug!("cleared s/c selection");
            self.send_selection_change();
        }
    }

    /// Drop entries whose targets are all gone. Returns how many were removed.
    ///
    /// Does not notify: dead entries are already invisible to readers.
    pub fn prune(&self) -> usize {
        let removed = sweep(&mut self.stripables.write().unwrap_or_else(|e| e.into_inner()));
        if removed > 0 {
            trace!("pruned {} expired selection entries", removed);
        }
        removed
    }

    // ========== Queries ==========

    /// True if `s` is selected as a whole, not just through one of its controls.
    ///
    /// An entry selected with a controllable that has since expired still
    /// counts as a control selection, so it does not select `s` on its own.
    pub fn selected_stripable(&self, s: &StripableRef) -> bool {
        let key = EntryKey::new(Some(s), None);
        let entries = self.stripables.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).is_some_and(|entry| entry.stripable.points_to(s))
    }

    /// True if `c` is selected, whichever stripable it was selected with.
    pub fn selected_controllable(&self, c: &ControllableRef) -> bool {
        let entries = self.stripables.read().unwrap_or_else(|e| e.into_inner());
        entries.values().any(|entry| entry.controllable.points_to(c))
    }

    /// Live entries in selection order.
    pub fn get_stripables(&self) -> Vec<StripableControllable> {
        let mut out: Vec<StripableControllable> = {
            let entries = self.stripables.read().unwrap_or_else(|e| e.into_inner());
            entries
                .values()
                .filter_map(|entry| {
                    let stripable = entry.stripable.upgrade();
                    let controllable = entry.controllable.upgrade();
                    (stripable.is_some() || controllable.is_some()).then_some(
                        StripableControllable { stripable, controllable, order: entry.order },
                    )
                })
                .collect()
        };
        out.sort_by_key(|sc| sc.order);
        out
    }

    /// Stored entries, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.stripables.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Notification ==========

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SelectionChangedEvent) + Send + Sync + 'static,
    {
        self.events.subscribe::<SelectionChangedEvent, _>(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Hold back change notifications until the returned guard (and every
    /// other live guard) is dropped. At most one notification is sent then.
    pub fn suspend_changes(&self) -> ChangeSuspender<'_> {
        self.suspend.lock().unwrap_or_else(|e| e.into_inner()).depth += 1;
        ChangeSuspender { selection: self }
    }

    fn send_selection_change(&self) {
        {
            let mut state = self.suspend.lock().unwrap_or_else(|e| e.into_inner());
            if state.depth > 0 {
                state.pending = true;
                return;
            }
        }
        self.events.emit(SelectionChangedEvent::default());
    }
}

/// Guard returned by `CoreSelection::suspend_changes`.
#[must_use = "notifications resume as soon as the suspender is dropped"]
pub struct ChangeSuspender<'a> {
    selection: &'a CoreSelection,
}

impl Drop for ChangeSuspender<'_> {
    fn drop(&mut self) {
        let send = {
            let mut state = self.selection.suspend.lock().unwrap_or_else(|e| e.into_inner());
            state.depth = state.depth.saturating_sub(1);
            state.depth == 0 && std::mem::take(&mut state.pending)
        };
        if send {
            self.selection.events.emit(SelectionChangedEvent::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Strip;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn strip(name: &str) -> StripableRef {
        Strip::new(name)
    }

    fn control(s: &Arc<Strip>, name: &str) -> ControllableRef {
        s.control(name).expect("control exists")
    }

    fn counted(sel: &CoreSelection) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        sel.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn names(sel: &CoreSelection) -> Vec<String> {
        sel.get_stripables()
            .iter()
            .map(|sc| match (&sc.stripable, &sc.controllable) {
                (Some(s), None) => s.name().to_string(),
                (Some(s), Some(c)) => format!("{}:{}", s.name(), c.name()),
                (None, Some(c)) => format!(":{}", c.name()),
                (None, None) => unreachable!("dead entries are filtered"),
            })
            .collect()
    }

    #[test]
    fn test_entries_are_independent_per_pair() {
        let sel = CoreSelection::new();
        let s1 = Strip::new("S1");
        let s1_ref: StripableRef = s1.clone();
        let c1 = control(&s1, "gain");

        sel.add(Some(&s1_ref), None);
        assert!(sel.selected_stripable(&s1_ref));

        sel.add(Some(&s1_ref), Some(&c1));
        assert!(sel.selected_stripable(&s1_ref));
        assert!(sel.selected_controllable(&c1));

        sel.remove(Some(&s1_ref), None);
        assert!(!sel.selected_stripable(&s1_ref));
        assert!(sel.selected_controllable(&c1));
    }

    #[test]
    fn test_control_selection_does_not_select_stripable() {
        let sel = CoreSelection::new();
        let s1 = Strip::new("S1");
        let s1_ref: StripableRef = s1.clone();
        let pan = control(&s1, "pan");

        sel.add(Some(&s1_ref), Some(&pan));
        assert!(!sel.selected_stripable(&s1_ref));
        assert!(sel.selected_controllable(&pan));

        // Control-only selection
        let sel = CoreSelection::new();
        sel.add(None, Some(&pan));
        assert!(sel.selected_controllable(&pan));
        assert!(!sel.selected_stripable(&s1_ref));
    }

    #[test]
    fn test_add_is_idempotent() {
        let sel = CoreSelection::new();
        let count = counted(&sel);
        let s1 = strip("S1");

        sel.add(Some(&s1), None);
        sel.add(Some(&s1), None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sel.len(), 1);
        assert_eq!(names(&sel), vec!["S1"]);
    }

    #[test]
    fn test_remove_missing_is_silent() {
        let sel = CoreSelection::new();
        let count = counted(&sel);
        let s1 = strip("S1");

        sel.remove(Some(&s1), None);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sel.add(Some(&s1), None);
        sel.remove(Some(&s1), None);
        sel.remove(Some(&s1), None);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(sel.is_empty());
    }

    #[test]
    fn test_set_same_is_noop() {
        let sel = CoreSelection::new();
        let s1 = strip("S1");
        sel.set(Some(&s1), None);
        let order = sel.get_stripables()[0].order;

        let count = counted(&sel);
        sel.set(Some(&s1), None);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(sel.get_stripables()[0].order, order);
    }

    #[test]
    fn test_set_replaces_selection() {
        let sel = CoreSelection::new();
        let (s1, s2, s3) = (strip("S1"), strip("S2"), strip("S3"));

        sel.set(Some(&s1), None);
        sel.set(Some(&s2), None);
        assert_eq!(names(&sel), vec!["S2"]);

        sel.add(Some(&s3), None);
        let count = counted(&sel);
        // S2 is selected but not alone: set must still replace
        sel.set(Some(&s2), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(names(&sel), vec!["S2"]);
    }

    #[test]
    fn test_set_observer_sees_final_state_only() {
        let sel = Arc::new(CoreSelection::new());
        let (s1, s2) = (strip("S1"), strip("S2"));
        sel.add(Some(&s1), None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&sel);
        let seen_cb = Arc::clone(&seen);
        sel.subscribe(move |_| {
            // Lock is released before listeners run, so re-querying is safe
            if let Some(sel) = weak.upgrade() {
                seen_cb.lock().unwrap().push(sel.get_stripables().len());
            }
        });

        sel.set(Some(&s2), None);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_set_none_clears() {
        let sel = CoreSelection::new();
        let s1 = strip("S1");
        sel.add(Some(&s1), None);
        let count = counted(&sel);

        sel.set(None, None);
        assert!(sel.is_empty());
        sel.set(None, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_notifies_once_only_when_non_empty() {
        let sel = CoreSelection::new();
        let count = counted(&sel);

        sel.clear_stripables();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (s1, s2) = (strip("S1"), strip("S2"));
        sel.add(Some(&s1), None);
        sel.add(Some(&s2), None);
        count.store(0, Ordering::SeqCst);

        sel.clear_stripables();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sel.get_stripables().is_empty());
    }

    #[test]
    fn test_toggle_stripable() {
        let sel = CoreSelection::new();
        let s1 = strip("S1");

        sel.toggle(Some(&s1), None);
        assert!(sel.selected_stripable(&s1));

        sel.toggle(Some(&s1), None);
        assert!(!sel.selected_stripable(&s1));
    }

    #[test]
    fn test_toggle_pair_when_stripable_selected() {
        let sel = CoreSelection::new();
        let s1 = Strip::new("S1");
        let s1_ref: StripableRef = s1.clone();
        let gain = control(&s1, "gain");

        // Stripable selected alone: toggling (s, c) takes the remove branch,
        // which finds no (s, c) entry, so nothing changes
        sel.add(Some(&s1_ref), None);
        sel.toggle(Some(&s1_ref), Some(&gain));
        assert!(sel.selected_stripable(&s1_ref));
        assert!(!sel.selected_controllable(&gain));

        // Without the bare selection the pair is added, then removed again
        sel.remove(Some(&s1_ref), None);
        sel.toggle(Some(&s1_ref), Some(&gain));
        assert!(sel.selected_controllable(&gain));
        sel.toggle(Some(&s1_ref), Some(&gain));
        assert!(!sel.selected_controllable(&gain));
        assert!(sel.is_empty());
    }

    #[test]
    fn test_get_stripables_in_insertion_order() {
        let sel = CoreSelection::new();
        let (s1, s2, s3) = (strip("S1"), strip("S2"), strip("S3"));

        sel.add(Some(&s2), None);
        sel.add(Some(&s1), None);
        sel.add(Some(&s3), None);
        sel.remove(Some(&s2), None);
        sel.add(Some(&s2), None);

        assert_eq!(names(&sel), vec!["S1", "S3", "S2"]);
        let orders: Vec<u64> = sel.get_stripables().iter().map(|sc| sc.order).collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_expired_entries_are_skipped_then_pruned() {
        let sel = CoreSelection::new();
        let keep = strip("Keep");
        let gone = Strip::new("Gone");
        let gone_ref: StripableRef = gone.clone();
        let gone_gain = control(&gone, "gain");

        sel.add(Some(&keep), None);
        sel.add(Some(&gone_ref), None);
        sel.add(None, Some(&gone_gain));
        drop((gone, gone_ref, gone_gain));

        assert_eq!(names(&sel), vec!["Keep"]);
        assert_eq!(sel.len(), 3);

        let count = counted(&sel);
        assert_eq!(sel.prune(), 2);
        assert_eq!(sel.len(), 1);
        assert_eq!(sel.prune(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_writes_sweep_dead_entries() {
        let sel = CoreSelection::new();
        let count = counted(&sel);
        for i in 0..1000 {
            let s = strip(&format!("S{i}"));
            sel.add(Some(&s), None);
            drop(s);
            assert!(sel.get_stripables().is_empty());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1000);

        let (a, b) = (strip("A"), strip("B"));
        sel.add(Some(&a), None);
        sel.add(Some(&b), None);
        assert_eq!(sel.len(), 2);
        assert_eq!(names(&sel), vec!["A", "B"]);

        drop(a);
        sel.remove(Some(&b), None);
        assert!(sel.is_empty());
    }

    #[test]
    fn test_half_expired_entry_stays_visible() {
        let sel = CoreSelection::new();
        let s1 = Strip::new("S1");
        let s1_ref: StripableRef = s1.clone();
        let plugin = Strip::with_controls("Plugins", ["cutoff"]);
        let cutoff = control(&plugin, "cutoff");

        sel.add(Some(&s1_ref), Some(&cutoff));
        drop((plugin, cutoff));

        let snapshot = sel.get_stripables();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].controllable.is_none());
        // Entry was a control selection, so S1 alone is still not selected
        assert!(!sel.selected_stripable(&s1_ref));
        assert_eq!(sel.prune(), 0);
    }

    #[test]
    fn test_selection_does_not_extend_lifetime() {
        let sel = CoreSelection::new();
        let s1 = Strip::new("S1");
        let weak = Arc::downgrade(&s1);
        let s1_ref: StripableRef = s1;
        sel.add(Some(&s1_ref), None);
        drop(s1_ref);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_suspender_batches_notifications() {
        let sel = CoreSelection::new();
        let count = counted(&sel);
        let (s1, s2) = (strip("S1"), strip("S2"));

        {
            let _outer = sel.suspend_changes();
            sel.add(Some(&s1), None);
            {
                let _inner = sel.suspend_changes();
                sel.add(Some(&s2), None);
            }
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        {
            let _quiet = sel.suspend_changes();
            sel.add(Some(&s1), None);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_are_queued_for_poll() {
        let sel = CoreSelection::with_events(EventBus::with_queue_limit(16));
        let s1 = strip("S1");
        sel.add(Some(&s1), None);
        sel.remove(Some(&s1), None);

        let events = sel.events().poll();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| crate::core::event_bus::downcast_event::<SelectionChangedEvent>(e).is_some()));
    }

    #[test]
    fn test_default_registry_keeps_no_backlog() {
        let sel = CoreSelection::new();
        let count = counted(&sel);
        let s1 = strip("S1");
        for _ in 0..1200 {
            sel.toggle(Some(&s1), None);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1200);
        assert_eq!(sel.events().queue_len(), 0);
    }

    #[test]
    fn test_concurrent_writers_get_unique_orders() {
        let sel = Arc::new(CoreSelection::new());
        let strips: Vec<StripableRef> = (0..64).map(|i| strip(&format!("S{i}"))).collect();

        thread::scope(|scope| {
            for chunk in strips.chunks(16) {
                let sel = Arc::clone(&sel);
                scope.spawn(move || {
                    for s in chunk {
                        sel.add(Some(s), None);
                        sel.toggle(Some(s), None);
                        sel.add(Some(s), None);
                    }
                });
            }
        });

        let snapshot = sel.get_stripables();
        assert_eq!(snapshot.len(), 64);
        let mut orders: Vec<u64> = snapshot.iter().map(|sc| sc.order).collect();
        orders.dedup();
        assert_eq!(orders.len(), 64);
        assert!(strips.iter().all(|s| sel.selected_stripable(s)));
    }

    #[test]
    fn test_readers_never_observe_empty_during_set() {
        let sel = Arc::new(CoreSelection::new());
        let (s1, s2) = (strip("S1"), strip("S2"));
        sel.set(Some(&s1), None);

        thread::scope(|scope| {
            let reader = Arc::clone(&sel);
            scope.spawn(move || {
                for _ in 0..2000 {
                    assert_eq!(reader.get_stripables().len(), 1);
                }
            });
            for i in 0..2000 {
                let s = if i % 2 == 0 { &s2 } else { &s1 };
                sel.set(Some(s), None);
            }
        });
    }
}
