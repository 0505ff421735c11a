//! Mixer entities the selection refers to.
//!
//! `Stripable` and `Controllable` are owned elsewhere (session, routes).
//! The selection only ever holds weak references to them.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// A mixing-console entity that can be selected (track, bus, VCA).
pub trait Stripable: Send + Sync {
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
}

/// A selectable control/parameter, optionally owned by a stripable.
pub trait Controllable: Send + Sync {
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
}

pub type StripableRef = Arc<dyn Stripable>;
pub type ControllableRef = Arc<dyn Controllable>;

impl fmt::Debug for dyn Stripable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stripable({})", self.name())
    }
}

impl fmt::Debug for dyn Controllable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Controllable({})", self.name())
    }
}

/// Basic control (gain, pan, mute, plugin parameter).
#[derive(Debug)]
pub struct Control {
    id: Uuid,
    name: String,
}

impl Control {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: Uuid::new_v4(), name: name.into() })
    }
}

impl Controllable for Control {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Channel strip with its own set of controls.
#[derive(Debug)]
pub struct Strip {
    id: Uuid,
    name: String,
    controls: Vec<Arc<Control>>,
}

impl Strip {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_controls(name, ["gain", "pan", "mute"])
    }

    pub fn with_controls<I, S>(name: impl Into<String>, controls: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            controls: controls.into_iter().map(Control::new).collect(),
        })
    }

    pub fn controls(&self) -> &[Arc<Control>] {
        &self.controls
    }

    /// Find a control by name
    pub fn control(&self, name: &str) -> Option<ControllableRef> {
        self.controls
            .iter()
            .find(|c| c.name == name)
            .map(|c| Arc::clone(c) as ControllableRef)
    }
}

impl Stripable for Strip {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
