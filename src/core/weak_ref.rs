//! Non-owning references with explicit expiry state.
//!
//! A `WeakRef` is either `Empty` (never set) or `Bound` to an allocation
//! it does not keep alive. Bound references remember the identity of their
//! target, so two references can still be compared after the target died.

use std::fmt;
use std::sync::{Arc, Weak};

/// Identity of a referenced allocation.
///
/// Taken from the allocation address. While any `Weak` to the allocation
/// exists the address cannot be reused, so an id held next to its handle
/// stays unique even after the value is dropped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(usize);

impl EntityId {
    pub fn of<T: ?Sized>(arc: &Arc<T>) -> Self {
        Self(Arc::as_ptr(arc) as *const () as usize)
    }

    fn of_weak<T: ?Sized>(weak: &Weak<T>) -> Self {
        Self(Weak::as_ptr(weak) as *const () as usize)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({:#x})", self.0)
    }
}

/// Observable state of a `WeakRef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    /// Never pointed at anything
    Empty,
    /// Target is alive
    Live,
    /// Target was dropped
    Expired,
}

/// Tagged weak reference: empty, or a handle plus the identity it was bound to.
pub enum WeakRef<T: ?Sized> {
    Empty,
    Bound { handle: Weak<T>, id: EntityId },
}

impl<T: ?Sized> WeakRef<T> {
    pub fn new(target: &Arc<T>) -> Self {
        let handle = Arc::downgrade(target);
        let id = EntityId::of_weak(&handle);
        Self::Bound { handle, id }
    }

    pub fn from_option(target: Option<&Arc<T>>) -> Self {
        target.map_or(Self::Empty, Self::new)
    }

    pub fn upgrade(&self) -> Option<Arc<T>> {
        match self {
            Self::Empty => None,
            Self::Bound { handle, .. } => handle.upgrade(),
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Empty => None,
            Self::Bound { id, .. } => Some(*id),
        }
    }

    pub fn state(&self) -> RefState {
        match self {
            Self::Empty => RefState::Empty,
            Self::Bound { handle, .. } if handle.strong_count() > 0 => RefState::Live,
            Self::Bound { .. } => RefState::Expired,
        }
    }

    /// True for bound references, live or expired.
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }

    pub fn is_live(&self) -> bool {
        self.state() == RefState::Live
    }

    /// True if this reference is bound to `target` and `target` is the live value.
    pub fn points_to(&self, target: &Arc<T>) -> bool {
        match self {
            Self::Empty => false,
            Self::Bound { handle, .. } => {
                handle.strong_count() > 0 && std::ptr::addr_eq(handle.as_ptr(), Arc::as_ptr(target))
            }
        }
    }
}

impl<T: ?Sized> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Bound { handle, id } => Self::Bound { handle: handle.clone(), id: *id },
        }
    }
}

impl<T: ?Sized> Default for WeakRef<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T: ?Sized> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("WeakRef::Empty"),
            Self::Bound { id, .. } => f
                .debug_struct("WeakRef")
                .field("id", id)
                .field("state", &self.state())
                .finish(),
        }
    }
}
