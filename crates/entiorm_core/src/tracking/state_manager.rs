//! Identity map of tracked entries.

use crate::metadata::EntityType;
use crate::tracking::{EntityEntry, EntityState, UpdateEntry};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type IdentityKey = (String, Vec<Value>);

/// Tracks entities by entity type and primary key.
///
/// A key is tracked at most once; materializing the same key again returns
/// the entry that is already tracked.
#[derive(Debug, Default)]
pub struct StateManager {
    entries: RwLock<HashMap<IdentityKey, Arc<EntityEntry>>>,
}

impl StateManager {
    /// Creates an empty state manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracked entry for a key, if any.
    pub fn try_get(&self, entity_type: &EntityType, key: &[Value]) -> Option<Arc<EntityEntry>> {
        self.entries
            .read()
            .get(&(entity_type.name().to_string(), key.to_vec()))
            .cloned()
    }

    /// Starts tracking an entity read by a query.
    ///
    /// If the key is already tracked the existing entry wins and `values` are
    /// ignored.
    pub fn start_tracking_from_query(
        &self,
        entity_type: &Arc<EntityType>,
        key: Vec<Value>,
        values: Vec<Value>,
    ) -> Arc<EntityEntry> {
        let identity = (entity_type.name().to_string(), key);
        if let Some(existing) = self.entries.read().get(&identity) {
            return existing.clone();
        }
        self.entries
            .write()
            .entry(identity)
            .or_insert_with(|| {
                Arc::new(EntityEntry::new(
                    entity_type.clone(),
                    values,
                    EntityState::Unchanged,
                ))
            })
            .clone()
    }

    /// Tracks an entry created by the application.
    pub fn track(&self, entry: Arc<EntityEntry>) {
        let identity = (entry.entity_type().name().to_string(), entry.key_values());
        self.entries.write().insert(identity, entry);
    }

    /// Returns all tracked entries.
    pub fn entries(&self) -> Vec<Arc<EntityEntry>> {
        self.entries.read().values().cloned().collect()
    }

    /// Returns the number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
