//! Table storage for the in-memory provider.

use entiorm_core::{CoreError, CoreResult, EntityType, Value, ValueBuffer};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Rows of every table, keyed by entity type name.
///
/// Each row holds one value per property in property-index order.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<ValueBuffer>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends rows to the table of `entity_type`.
    ///
    /// Every row must have exactly one value per property.
    pub fn seed(&self, entity_type: &EntityType, rows: Vec<Vec<Value>>) -> CoreResult<()> {
        let width = entity_type.property_count();
        let mut buffers = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != width {
                return Err(CoreError::invalid_argument(format!(
                    "row for '{}' has {} values, expected {}",
                    entity_type.name(),
                    row.len(),
                    width
                )));
            }
            buffers.push(ValueBuffer::new(row));
        }
        tracing::debug!(
            entity_type = entity_type.name(),
            rows = buffers.len(),
            "seeding in-memory table"
        );
        self.tables
            .write()
            .entry(entity_type.name().to_string())
            .or_default()
            .extend(buffers);
        Ok(())
    }

    /// Returns a snapshot of a table; unknown tables are empty.
    pub fn rows(&self, entity_type: &EntityType) -> Vec<ValueBuffer> {
        self.tables
            .read()
            .get(entity_type.name())
            .cloned()
            .unwrap_or_default()
    }

    /// Removes every row of every table.
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::{Property, ScalarType};

    #[test]
    fn seed_checks_row_width() {
        let et = EntityType::builder("Tag")
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Label", ScalarType::Text))
            .build()
            .unwrap();
        let store = InMemoryStore::new();
        store
            .seed(&et, vec![vec![Value::Integer(1), "a".into()]])
            .unwrap();
        assert!(store.seed(&et, vec![vec![Value::Integer(2)]]).is_err());
        assert_eq!(store.rows(&et).len(), 1);
        store.clear();
        assert!(store.rows(&et).is_empty());
    }
}
