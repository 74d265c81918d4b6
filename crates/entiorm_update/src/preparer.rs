//! Turns tracked entries into batches of modification commands.

use crate::batch::ModificationCommandBatch;
use crate::config::BatchOptions;
use crate::error::{UpdateError, UpdateResult};
use crate::modification_command::ModificationCommand;
use crate::sql_generator::UpdateSqlGenerator;
use entiorm_core::{EntityState, UpdateEntry, Value};
use std::collections::HashMap;
use std::sync::Arc;

type RowKey = (Option<String>, String, Vec<Value>);

/// Builds one command per row and packs commands into batches.
#[derive(Debug, Clone)]
pub struct CommandBatchPreparer {
    generator: Arc<dyn UpdateSqlGenerator>,
    options: BatchOptions,
}

impl CommandBatchPreparer {
    /// Creates a preparer for one dialect.
    pub fn new(generator: Arc<dyn UpdateSqlGenerator>, options: BatchOptions) -> Self {
        Self { generator, options }
    }

    /// Returns the dialect.
    pub fn generator(&self) -> &Arc<dyn UpdateSqlGenerator> {
        &self.generator
    }

    /// Returns the batch options.
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Builds the commands for the entries that need saving, in entry order.
    ///
    /// Entries mapped to the same table and key share one command.
    /// Unchanged and detached entries, and modified entries with no
    /// modified property, are skipped.
    pub fn create_commands(
        &self,
        entries: &[Arc<dyn UpdateEntry>],
    ) -> UpdateResult<Vec<ModificationCommand>> {
        let mut commands: Vec<ModificationCommand> = Vec::new();
        let mut rows: HashMap<RowKey, usize> = HashMap::new();

        for entry in entries {
            if !needs_saving(entry.as_ref()) {
                continue;
            }
            match row_key(entry.as_ref()) {
                Some(key) => match rows.get(&key) {
                    Some(&index) => commands[index].add_entry(Arc::clone(entry))?,
                    None => {
                        rows.insert(key, commands.len());
                        commands.push(ModificationCommand::for_entry(Arc::clone(entry))?);
                    }
                },
                None => commands.push(ModificationCommand::for_entry(Arc::clone(entry))?),
            }
        }
        Ok(commands)
    }

    /// Packs commands into batches in order.
    ///
    /// Fails when a command needs more parameters than any batch allows.
    pub fn batch_commands(
        &self,
        commands: impl IntoIterator<Item = ModificationCommand>,
    ) -> UpdateResult<Vec<ModificationCommandBatch>> {
        let mut batches = Vec::new();
        let mut current = self.new_batch();
        for command in commands {
            let Err(command) = current.try_add_command(command) else {
                continue;
            };
            if !current.is_empty() {
                batches.push(std::mem::replace(&mut current, self.new_batch()));
            }
            if let Err(command) = current.try_add_command(command) {
                return Err(UpdateError::invalid_argument(format!(
                    "command for table '{}' needs {} parameter(s) but a batch allows fewer than {}",
                    command.table_name(),
                    command.parameter_count(),
                    self.options.max_parameter_count
                )));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }

    /// Builds the batches for `entries`.
    pub fn prepare(
        &self,
        entries: &[Arc<dyn UpdateEntry>],
    ) -> UpdateResult<Vec<ModificationCommandBatch>> {
        let commands = self.create_commands(entries)?;
        let batches = self.batch_commands(commands)?;
        tracing::debug!(
            entries = entries.len(),
            batches = batches.len(),
            "prepared modification batches"
        );
        Ok(batches)
    }

    fn new_batch(&self) -> ModificationCommandBatch {
        ModificationCommandBatch::new(Arc::clone(&self.generator), self.options)
    }
}

fn needs_saving(entry: &dyn UpdateEntry) -> bool {
    match entry.entity_state() {
        EntityState::Added | EntityState::Deleted => true,
        EntityState::Modified => entry
            .entity_type()
            .properties()
            .iter()
            .any(|p| entry.is_modified(p)),
        EntityState::Unchanged | EntityState::Detached => false,
    }
}

/// The row an entry maps to, or `None` while the store still has to
/// generate its key.
fn row_key(entry: &dyn UpdateEntry) -> Option<RowKey> {
    let entity_type = entry.entity_type();
    let mut key = Vec::new();
    for property in entity_type.primary_key() {
        if entry.is_store_generated(property) {
            return None;
        }
        key.push(entry.current_value(property));
    }
    Some((
        entity_type.schema().map(str::to_owned),
        entity_type.table_name().to_owned(),
        key,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_generator::SqlServerUpdateSqlGenerator;
    use entiorm_core::{EntityEntry, EntityType, Property, ScalarType};

    fn blog_type() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap()
    }

    fn details_type() -> Arc<EntityType> {
        EntityType::builder("BlogDetails")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Summary", ScalarType::Text).nullable())
            .build()
            .unwrap()
    }

    fn preparer(max_batch_size: usize) -> CommandBatchPreparer {
        CommandBatchPreparer::new(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::new(max_batch_size, 2100).unwrap(),
        )
    }

    fn entry(et: Arc<EntityType>, values: Vec<Value>, state: EntityState) -> Arc<dyn UpdateEntry> {
        Arc::new(EntityEntry::new(et, values, state))
    }

    #[test]
    fn entries_sharing_a_row_share_a_command() {
        let entries = vec![
            entry(blog_type(), vec![5.into(), "a".into()], EntityState::Added),
            entry(details_type(), vec![5.into(), "about a".into()], EntityState::Added),
            entry(blog_type(), vec![0.into(), "b".into()], EntityState::Added),
            entry(blog_type(), vec![0.into(), "c".into()], EntityState::Added),
        ];
        let commands = preparer(42).create_commands(&entries).unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].entries().len(), 2);
    }

    #[test]
    fn conflicting_states_for_one_row_fail() {
        let entries = vec![
            entry(blog_type(), vec![5.into(), "a".into()], EntityState::Deleted),
            entry(details_type(), vec![5.into(), "x".into()], EntityState::Added),
        ];
        assert!(matches!(
            preparer(42).create_commands(&entries),
            Err(UpdateError::ConflictingStates { .. })
        ));
    }

    #[test]
    fn untouched_entries_are_skipped() {
        let entries = vec![
            entry(blog_type(), vec![1.into(), "a".into()], EntityState::Unchanged),
            entry(blog_type(), vec![2.into(), "b".into()], EntityState::Modified),
            entry(blog_type(), vec![3.into(), "c".into()], EntityState::Deleted),
        ];
        let commands = preparer(42).create_commands(&entries).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].entity_state(), EntityState::Deleted);
    }

    #[test]
    fn commands_fill_batches_in_order() {
        let entries: Vec<_> = (1..=5)
            .map(|i| entry(blog_type(), vec![i.into(), "x".into()], EntityState::Deleted))
            .collect();
        let batches = preparer(2).prepare(&entries).unwrap();
        let sizes: Vec<_> = batches.iter().map(ModificationCommandBatch::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn oversized_commands_are_rejected() {
        let preparer = CommandBatchPreparer::new(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::new(10, 2).unwrap(),
        );
        let fits = entry(blog_type(), vec![1.into(), "x".into()], EntityState::Deleted);
        let oversized = entry(details_type(), vec![0.into(), "about".into()], EntityState::Added);
        assert_eq!(preparer.prepare(&[fits.clone()]).unwrap().len(), 1);

        let err = preparer.prepare(&[fits, oversized]).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidArgument { .. }));
        let message = err.to_string();
        assert!(message.contains("'Blogs'") && message.contains("2 parameter(s)"), "{message}");
    }
}
