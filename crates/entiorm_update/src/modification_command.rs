//! Modification commands: everything needed to persist one row.

use crate::column_modification::{ColumnFlags, ColumnModification};
use crate::error::{UpdateError, UpdateResult};
use entiorm_core::{CoreError, EntityState, UpdateEntry, ValueBuffer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The entries that make up one physical row, and the column operations
/// derived from them.
///
/// The column list is built on first read and rebuilt after
/// [`ModificationCommand::add_entry`].
pub struct ModificationCommand {
    table: String,
    schema: Option<String>,
    entries: Vec<Arc<dyn UpdateEntry>>,
    columns: OnceLock<Vec<ColumnModification>>,
}

impl ModificationCommand {
    /// Creates an empty command for `table`.
    pub fn new(table: impl Into<String>, schema: Option<String>) -> UpdateResult<Self> {
        let table = table.into();
        if table.is_empty() {
            return Err(UpdateError::invalid_argument("table name is empty"));
        }
        Ok(Self {
            table,
            schema,
            entries: Vec::new(),
            columns: OnceLock::new(),
        })
    }

    /// Creates a command for the table of `entry`, holding that entry.
    pub fn for_entry(entry: Arc<dyn UpdateEntry>) -> UpdateResult<Self> {
        let entity_type = entry.entity_type();
        let mut command = Self::new(
            entity_type.table_name(),
            entity_type.schema().map(str::to_owned),
        )?;
        command.add_entry(entry)?;
        Ok(command)
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Returns the schema, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Returns the entries in the order they were added.
    pub fn entries(&self) -> &[Arc<dyn UpdateEntry>] {
        &self.entries
    }

    /// Returns the shared state of the entries; `Detached` while empty.
    pub fn entity_state(&self) -> EntityState {
        self.entries
            .first()
            .map_or(EntityState::Detached, |e| e.entity_state())
    }

    /// Adds an entry mapped to the same row.
    ///
    /// The entry must map to this command's table and be in the same saved
    /// state as the entries already present.
    pub fn add_entry(&mut self, entry: Arc<dyn UpdateEntry>) -> UpdateResult<()> {
        let entity_type = entry.entity_type();
        if entity_type.table_name() != self.table || entity_type.schema() != self.schema() {
            return Err(UpdateError::invalid_argument(format!(
                "entity type '{}' is not mapped to table '{}'",
                entity_type.name(),
                self.table
            )));
        }

        let state = entry.entity_state();
        if !matches!(
            state,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        ) {
            return Err(UpdateError::invalid_argument(format!(
                "cannot save an entry in state {state:?}"
            )));
        }
        let existing = self.entity_state();
        if !self.entries.is_empty() && existing != state {
            return Err(UpdateError::ConflictingStates {
                table: self.table.clone(),
                existing,
                added: state,
            });
        }

        self.entries.push(entry);
        self.columns = OnceLock::new();
        Ok(())
    }

    /// Returns the column modifications, building them if needed.
    ///
    /// Columns shared by several entries appear once, owned by the first
    /// entry that maps them; the other entries share the column and receive
    /// its store-generated values too.
    pub fn column_modifications(&self) -> &[ColumnModification] {
        self.columns.get_or_init(|| {
            let state = self.entity_state();
            let mut positions: HashMap<String, usize> = HashMap::new();
            let mut columns: Vec<ColumnModification> = Vec::new();
            for entry in &self.entries {
                for property in entry.entity_type().properties() {
                    let Some(flags) = ColumnFlags::classify(entry.as_ref(), property, state) else {
                        continue;
                    };
                    match positions.get(property.column_name()) {
                        Some(&position) => {
                            columns[position].share_with(Arc::clone(entry), property.clone());
                        }
                        None => {
                            positions.insert(property.column_name().to_owned(), columns.len());
                            columns.push(ColumnModification::new(
                                Arc::clone(entry),
                                property.clone(),
                                flags,
                            ));
                        }
                    }
                }
            }
            columns
        })
    }

    /// Columns written with client values.
    pub fn write_columns(&self) -> impl Iterator<Item = &ColumnModification> {
        self.column_modifications().iter().filter(|c| c.is_write())
    }

    /// Columns read back from the store, in result-row order.
    pub fn read_columns(&self) -> impl Iterator<Item = &ColumnModification> {
        self.column_modifications().iter().filter(|c| c.is_read())
    }

    /// Primary key columns.
    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnModification> {
        self.column_modifications().iter().filter(|c| c.is_key())
    }

    /// Columns whose original values go into the WHERE clause.
    pub fn condition_columns(&self) -> impl Iterator<Item = &ColumnModification> {
        self.column_modifications().iter().filter(|c| c.is_condition())
    }

    /// True when the store returns values for this command.
    pub fn requires_result_propagation(&self) -> bool {
        self.read_columns().next().is_some()
    }

    /// Number of parameters the command's statement uses.
    pub fn parameter_count(&self) -> usize {
        self.column_modifications()
            .iter()
            .map(ColumnModification::parameter_count)
            .sum()
    }

    /// Stages the values of a result row onto the entries.
    ///
    /// The row holds one value per read column, in read-column order.
    pub fn propagate_results(&self, row: &ValueBuffer) -> UpdateResult<()> {
        for (ordinal, column) in self.read_columns().enumerate() {
            let value = row.get(ordinal).cloned().ok_or_else(|| {
                UpdateError::update(
                    CoreError::data_reader(format!(
                        "result row has {} value(s) but column '{}' is at ordinal {ordinal}",
                        row.len(),
                        column.column_name()
                    )),
                    self.entries.clone(),
                )
            })?;
            tracing::trace!(
                table = %self.table,
                column = column.column_name(),
                %value,
                "propagating store-generated value"
            );
            column.set_value(value);
        }
        Ok(())
    }
}

impl fmt::Debug for ModificationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModificationCommand")
            .field("table", &self.table)
            .field("schema", &self.schema)
            .field("state", &self.entity_state())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::{EntityEntry, EntityType, Property, ScalarType, Value};

    fn blog_type() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap()
    }

    fn blog_details_type() -> Arc<EntityType> {
        EntityType::builder("BlogDetails")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Summary", ScalarType::Text).nullable())
            .build()
            .unwrap()
    }

    fn entry(et: Arc<EntityType>, values: Vec<Value>, state: EntityState) -> Arc<dyn UpdateEntry> {
        Arc::new(EntityEntry::new(et, values, state))
    }

    #[test]
    fn empty_table_name_is_rejected() {
        assert!(matches!(
            ModificationCommand::new("", None),
            Err(UpdateError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn entries_for_other_tables_are_rejected() {
        let other = EntityType::builder("Tag")
            .property(Property::new("Id", ScalarType::Integer).key())
            .build()
            .unwrap();
        let mut command = ModificationCommand::new("Blogs", None).unwrap();
        let err = command
            .add_entry(entry(other, vec![1.into()], EntityState::Added))
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidArgument { .. }));
    }

    #[test]
    fn conflicting_states_are_rejected() {
        let mut command = ModificationCommand::for_entry(entry(
            blog_type(),
            vec![1.into(), "a".into()],
            EntityState::Modified,
        ))
        .unwrap();
        let err = command
            .add_entry(entry(
                blog_details_type(),
                vec![1.into()],
                EntityState::Deleted,
            ))
            .unwrap_err();
        assert!(matches!(err, UpdateError::ConflictingStates { .. }));
        assert_eq!(command.entries().len(), 1);
    }

    #[test]
    fn unchanged_entries_are_not_saved() {
        let result = ModificationCommand::for_entry(entry(
            blog_type(),
            vec![1.into(), "a".into()],
            EntityState::Unchanged,
        ));
        assert!(matches!(result, Err(UpdateError::InvalidArgument { .. })));
    }

    #[test]
    fn columns_are_rebuilt_after_adding_an_entry() {
        let mut command = ModificationCommand::for_entry(entry(
            blog_type(),
            vec![0.into(), "a".into()],
            EntityState::Added,
        ))
        .unwrap();
        let names: Vec<_> = command
            .column_modifications()
            .iter()
            .map(|c| c.column_name().to_owned())
            .collect();
        assert_eq!(names, ["Id", "Name"]);
        assert!(command.requires_result_propagation());
        assert_eq!(command.parameter_count(), 1);

        command
            .add_entry(entry(
                blog_details_type(),
                vec![0.into(), "about".into()],
                EntityState::Added,
            ))
            .unwrap();
        let names: Vec<_> = command
            .column_modifications()
            .iter()
            .map(|c| c.column_name().to_owned())
            .collect();
        assert_eq!(names, ["Id", "Name", "Summary"]);
        assert_eq!(command.parameter_count(), 2);
        assert_eq!(command.column_modifications()[0].entries().count(), 2);
    }

    #[test]
    fn generated_values_reach_every_entry_sharing_the_row() {
        let blog = Arc::new(EntityEntry::new(
            blog_type(),
            vec![0.into(), "a".into()],
            EntityState::Added,
        ));
        let details = Arc::new(EntityEntry::new(
            blog_details_type(),
            vec![0.into(), "about".into()],
            EntityState::Added,
        ));
        let mut command = ModificationCommand::for_entry(blog.clone()).unwrap();
        command.add_entry(details.clone()).unwrap();

        command
            .propagate_results(&ValueBuffer::new(vec![7.into()]))
            .unwrap();
        assert_eq!(blog.pending_value("Id").unwrap(), Some(Value::from(7)));
        assert_eq!(details.pending_value("Id").unwrap(), Some(Value::from(7)));
    }

    #[test]
    fn results_are_staged_in_read_column_order() {
        let blog = blog_type();
        let tracked = Arc::new(EntityEntry::new(
            blog.clone(),
            vec![0.into(), "a".into()],
            EntityState::Added,
        ));
        let command = ModificationCommand::for_entry(tracked.clone()).unwrap();

        command
            .propagate_results(&ValueBuffer::new(vec![7.into()]))
            .unwrap();
        assert_eq!(tracked.pending_value("Id").unwrap(), Some(Value::from(7)));
        assert_eq!(tracked.value("Id").unwrap(), Value::from(0));

        let err = command
            .propagate_results(&ValueBuffer::new(vec![]))
            .unwrap_err();
        assert_eq!(err.entries().len(), 1);
    }
}
