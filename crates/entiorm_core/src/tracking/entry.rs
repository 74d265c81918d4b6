//! Tracked entries.

use crate::error::CoreResult;
use crate::metadata::{EntityType, Property, ValueGenerated};
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Not tracked.
    Detached,
    /// Tracked and identical to the store.
    Unchanged,
    /// Tracked, to be inserted.
    Added,
    /// Tracked, some properties changed.
    Modified,
    /// Tracked, to be deleted.
    Deleted,
}

/// What the update pipeline needs from a tracked entry.
pub trait UpdateEntry: fmt::Debug + Send + Sync {
    /// Returns the entry's entity type.
    fn entity_type(&self) -> &Arc<EntityType>;

    /// Returns the current state.
    fn entity_state(&self) -> EntityState;

    /// Returns the current value of a property.
    fn current_value(&self, property: &Property) -> Value;

    /// Returns the value the property had when it was last read from the store.
    fn original_value(&self, property: &Property) -> Value;

    /// Returns true if the property was changed since it was last read.
    fn is_modified(&self, property: &Property) -> bool;

    /// Returns true if the store will generate the property's value during
    /// this save, so the value must be read back.
    fn is_store_generated(&self, property: &Property) -> bool;

    /// Stages a value propagated from the store. It becomes visible only after
    /// [`UpdateEntry::accept_store_generated_values`].
    fn set_store_generated_value(&self, property: &Property, value: Value);

    /// Commits staged store-generated values onto the entity.
    fn accept_store_generated_values(&self);

    /// Drops staged store-generated values.
    fn discard_store_generated_values(&self);

    /// Marks the entry as persisted after a successful save.
    fn accept_changes(&self);
}

#[derive(Debug)]
struct EntryData {
    state: EntityState,
    current: Vec<Value>,
    original: Vec<Value>,
    modified: Vec<bool>,
    pending: Vec<Option<Value>>,
}

/// A tracked entity: its property values, original values and state.
pub struct EntityEntry {
    entity_type: Arc<EntityType>,
    data: Mutex<EntryData>,
}

impl EntityEntry {
    /// Creates an entry with the given values, one per property.
    ///
    /// Missing trailing values are filled with the property defaults.
    pub fn new(entity_type: Arc<EntityType>, mut values: Vec<Value>, state: EntityState) -> Self {
        for property in entity_type.properties().iter().skip(values.len()) {
            values.push(property.scalar_type().default_value());
        }
        values.truncate(entity_type.property_count());
        let count = values.len();
        Self {
            data: Mutex::new(EntryData {
                state,
                original: values.clone(),
                current: values,
                modified: vec![false; count],
                pending: vec![None; count],
            }),
            entity_type,
        }
    }

    /// Creates an entry from `(property name, value)` pairs; unspecified
    /// properties take their defaults.
    pub fn with_values<'a>(
        entity_type: Arc<EntityType>,
        values: impl IntoIterator<Item = (&'a str, Value)>,
        state: EntityState,
    ) -> CoreResult<Self> {
        let mut row: Vec<Value> = entity_type
            .properties()
            .iter()
            .map(|p| p.scalar_type().default_value())
            .collect();
        for (name, value) in values {
            row[entity_type.property(name)?.index()] = value;
        }
        Ok(Self::new(entity_type, row, state))
    }

    /// Returns the current state.
    pub fn state(&self) -> EntityState {
        self.data.lock().state
    }

    /// Changes the state.
    pub fn set_state(&self, state: EntityState) {
        self.data.lock().state = state;
    }

    /// Returns the current value of a property by name.
    pub fn value(&self, name: &str) -> CoreResult<Value> {
        let index = self.entity_type.property(name)?.index();
        Ok(self.data.lock().current[index].clone())
    }

    /// Returns all current values in property order.
    pub fn values(&self) -> Vec<Value> {
        self.data.lock().current.clone()
    }

    /// Returns the current primary key values.
    pub fn key_values(&self) -> Vec<Value> {
        let data = self.data.lock();
        self.entity_type
            .primary_key()
            .map(|p| data.current[p.index()].clone())
            .collect()
    }

    /// Assigns a property value, marking the property modified and moving an
    /// unchanged entry to `Modified`.
    pub fn set_value(&self, name: &str, value: Value) -> CoreResult<()> {
        let index = self.entity_type.property(name)?.index();
        let mut data = self.data.lock();
        if data.current[index] != value {
            data.current[index] = value;
            data.modified[index] = true;
            if data.state == EntityState::Unchanged {
                data.state = EntityState::Modified;
            }
        }
        Ok(())
    }

    /// Returns the staged store-generated value of a property, if any.
    pub fn pending_value(&self, name: &str) -> CoreResult<Option<Value>> {
        let index = self.entity_type.property(name)?.index();
        Ok(self.data.lock().pending[index].clone())
    }
}

impl fmt::Debug for EntityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("EntityEntry")
            .field("entity_type", &self.entity_type.name())
            .field("state", &data.state)
            .field("values", &data.current)
            .finish()
    }
}

impl UpdateEntry for EntityEntry {
    fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    fn entity_state(&self) -> EntityState {
        self.state()
    }

    fn current_value(&self, property: &Property) -> Value {
        self.data.lock().current[property.index()].clone()
    }

    fn original_value(&self, property: &Property) -> Value {
        self.data.lock().original[property.index()].clone()
    }

    fn is_modified(&self, property: &Property) -> bool {
        self.data.lock().modified[property.index()]
    }

    fn is_store_generated(&self, property: &Property) -> bool {
        let data = self.data.lock();
        match (data.state, property.generated()) {
            (EntityState::Added, ValueGenerated::OnAdd | ValueGenerated::OnAddOrUpdate) => data
                .current[property.index()]
                .is_default_for(property.scalar_type()),
            (EntityState::Modified, ValueGenerated::OnAddOrUpdate) => {
                !data.modified[property.index()]
            }
            _ => false,
        }
    }

    fn set_store_generated_value(&self, property: &Property, value: Value) {
        self.data.lock().pending[property.index()] = Some(value);
    }

    fn accept_store_generated_values(&self) {
        let mut data = self.data.lock();
        let data = &mut *data;
        for (index, pending) in data.pending.iter_mut().enumerate() {
            if let Some(value) = pending.take() {
                data.current[index] = value;
            }
        }
    }

    fn discard_store_generated_values(&self) {
        let mut data = self.data.lock();
        data.pending.iter_mut().for_each(|p| *p = None);
    }

    fn accept_changes(&self) {
        let mut data = self.data.lock();
        data.state = match data.state {
            EntityState::Deleted | EntityState::Detached => EntityState::Detached,
            _ => EntityState::Unchanged,
        };
        data.original = data.current.clone();
        data.modified.iter_mut().for_each(|m| *m = false);
    }
}
