//! Presentation property changes broadcast by the selection.

/// Presentation properties a listener may care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Selected,
    Order,
    Hidden,
}

/// Set of changed properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyChange {
    props: Vec<Property>,
}

impl PropertyChange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change containing only `prop`
    pub fn of(prop: Property) -> Self {
        let mut pc = Self::new();
        pc.add(prop);
        pc
    }

    pub fn add(&mut self, prop: Property) {
        if !self.props.contains(&prop) {
            self.props.push(prop);
        }
    }

    pub fn contains(&self, prop: Property) -> bool {
        self.props.contains(&prop)
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// Selection membership changed. Carries no entry detail:
/// listeners re-query `CoreSelection` to learn what is selected now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionChangedEvent {
    pub what: PropertyChange,
}

impl Default for SelectionChangedEvent {
    fn default() -> Self {
        Self { what: PropertyChange::of(Property::Selected) }
    }
}
