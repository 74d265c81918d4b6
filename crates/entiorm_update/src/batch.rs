//! Modification command batches.
//!
//! A batch packs as many commands as the provider allows into one round
//! trip, renders their statements into one command text, and walks the
//! reader afterwards to propagate generated values and detect rows that
//! were changed concurrently.

use crate::config::{BatchOptions, ReaderPositioning};
use crate::error::{UpdateError, UpdateResult};
use crate::modification_command::ModificationCommand;
use crate::sql_generator::{can_group_inserts, CommandBuilder, ResultSetMapping, UpdateSqlGenerator};
use crate::column_modification::ParameterNameGenerator;
use entiorm_core::{
    AsyncDataReader, CancellationToken, CoreError, DataReader, EntityState, RelationalCommand,
    RelationalConnection, UpdateEntry, Value, ValueBuffer,
};
use std::sync::Arc;

/// The rendered text of a batch and how its commands map onto the reader.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommandText {
    /// Command text and parameters.
    pub command: RelationalCommand,
    /// Result-set mapping per command, in command order.
    pub mappings: Vec<ResultSetMapping>,
    statement_ends: Vec<bool>,
    positioned: Vec<bool>,
}

impl BatchCommandText {
    /// True when the statement holding command `index` ends with it.
    ///
    /// Commands grouped into one multi-row insert share a statement; only
    /// the last of them ends it.
    pub fn ends_statement(&self, index: usize) -> bool {
        self.statement_ends.get(index).copied().unwrap_or(false)
    }

    /// True when command `index` belongs to a grouped insert whose rows
    /// carry their command's position in the last column.
    pub fn reads_by_position(&self, index: usize) -> bool {
        self.positioned.get(index).copied().unwrap_or(false)
    }
}

/// One move over the reader while consuming a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderStep {
    /// Move past the empty result of a statement that returns nothing,
    /// before command `expecting` reads its row.
    SkipStatement { expecting: usize },
    /// Read the row of `command`.
    ReadRow { command: usize, last_in_set: bool },
    /// Read `count` rows of a grouped insert in any order, matching each to
    /// command `first + position`.
    ReadGroup { first: usize, count: usize },
}

/// Commands sent to the store in one round trip.
#[derive(Debug)]
pub struct ModificationCommandBatch {
    generator: Arc<dyn UpdateSqlGenerator>,
    options: BatchOptions,
    commands: Vec<ModificationCommand>,
    parameter_count: usize,
    names: ParameterNameGenerator,
    cached_text: Option<BatchCommandText>,
}

impl ModificationCommandBatch {
    /// Creates an empty batch.
    pub fn new(generator: Arc<dyn UpdateSqlGenerator>, options: BatchOptions) -> Self {
        Self {
            generator,
            options,
            commands: Vec::new(),
            parameter_count: 0,
            names: ParameterNameGenerator::new(),
            cached_text: None,
        }
    }

    /// Returns the commands in execution order.
    pub fn commands(&self) -> &[ModificationCommand] {
        &self.commands
    }

    /// Returns the number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if the batch holds no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the parameters used by the commands so far.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Returns true if `command` fits.
    ///
    /// A command is rejected once the batch holds the maximum number of
    /// commands, or when its parameters would bring the batch to the
    /// parameter limit.
    pub fn can_add_command(&self, command: &ModificationCommand) -> bool {
        self.commands.len() < self.options.max_batch_size
            && self.parameter_count + command.parameter_count() < self.options.max_parameter_count
    }

    /// Adds `command` if it fits, handing it back otherwise.
    pub fn try_add_command(
        &mut self,
        command: ModificationCommand,
    ) -> Result<(), ModificationCommand> {
        if !self.can_add_command(&command) {
            return Err(command);
        }
        self.parameter_count += command.parameter_count();
        self.commands.push(command);
        self.cached_text = None;
        Ok(())
    }

    /// Drops the cached command text; the next request renders it again.
    pub fn reset_command_text(&mut self) {
        self.cached_text = None;
    }

    /// Returns the command text, rendering it if needed.
    pub fn command_text(&mut self) -> UpdateResult<&BatchCommandText> {
        if self.cached_text.is_none() {
            let text = self.render()?;
            tracing::debug!(
                dialect = self.generator.name(),
                commands = self.commands.len(),
                parameters = text.command.parameters.len(),
                sql = %text.command.text,
                "rendered modification batch"
            );
            self.cached_text = Some(text);
        }
        self.cached_text
            .as_ref()
            .ok_or_else(|| UpdateError::Core(CoreError::invalid_operation("batch text is missing")))
    }

    fn render(&mut self) -> UpdateResult<BatchCommandText> {
        let generator = Arc::clone(&self.generator);
        let mut builder = CommandBuilder::new(generator.helper(), &mut self.names);
        generator.append_batch_header(&mut builder);

        let count = self.commands.len();
        let mut mappings = vec![ResultSetMapping::NoResultSet; count];
        let mut statement_ends = vec![true; count];
        let mut positioned = vec![false; count];
        let mut grouping: Vec<usize> = Vec::new();

        for index in 0..count {
            let command = &self.commands[index];
            let groupable = self.options.bulk_insert
                && command.entity_state() == EntityState::Added
                && (generator.returns_grouped_row_positions()
                    || !command.requires_result_propagation());
            if groupable {
                let compatible = grouping
                    .first()
                    .map_or(true, |&first| can_group_inserts(&self.commands[first], command));
                if !compatible {
                    flush_grouping(
                        generator.as_ref(),
                        &mut builder,
                        &self.commands,
                        &mut grouping,
                        &mut mappings,
                        &mut statement_ends,
                        &mut positioned,
                    )?;
                }
                grouping.push(index);
                continue;
            }

            flush_grouping(
                generator.as_ref(),
                &mut builder,
                &self.commands,
                &mut grouping,
                &mut mappings,
                &mut statement_ends,
                &mut positioned,
            )?;
            mappings[index] = generator.append_operation(&mut builder, command)?;
        }
        flush_grouping(
            generator.as_ref(),
            &mut builder,
            &self.commands,
            &mut grouping,
            &mut mappings,
            &mut statement_ends,
            &mut positioned,
        )?;

        Ok(BatchCommandText {
            command: builder.finish(),
            mappings,
            statement_ends,
            positioned,
        })
    }

    /// Executes the batch and consumes its results.
    pub fn execute(&mut self, connection: &dyn RelationalConnection) -> UpdateResult<()> {
        let command = self.command_text()?.command.clone();
        let mut reader = connection
            .execute_reader(&command)
            .map_err(|e| UpdateError::update(e, self.entries()))?;
        self.consume(reader.as_mut())
    }

    /// Executes the batch and consumes its results asynchronously.
    pub async fn execute_async(
        &mut self,
        connection: &dyn RelationalConnection,
        cancellation: &CancellationToken,
    ) -> UpdateResult<()> {
        cancellation.check()?;
        let command = self.command_text()?.command.clone();
        let mut reader = connection
            .execute_reader_async(&command)
            .await
            .map_err(|e| UpdateError::update(e, self.entries()))?;
        self.consume_async(reader.as_mut(), cancellation).await
    }

    /// Walks the reader, propagating generated values into the commands.
    pub fn consume(&mut self, reader: &mut dyn DataReader) -> UpdateResult<()> {
        for step in self.reader_steps()? {
            match step {
                ReaderStep::SkipStatement { expecting } => {
                    let advanced = reader
                        .next_result()
                        .map_err(|e| self.wrap(e, expecting))?;
                    if !advanced {
                        return Err(self.concurrency(expecting, 0));
                    }
                }
                ReaderStep::ReadRow {
                    command,
                    last_in_set,
                } => {
                    if !reader.read().map_err(|e| self.wrap(e, command))? {
                        return Err(self.concurrency(command, 0));
                    }
                    let row = reader.value_buffer().map_err(|e| self.wrap(e, command))?;
                    self.propagate(command, &row)?;
                    if last_in_set {
                        reader.next_result().map_err(|e| self.wrap(e, command))?;
                    }
                }
                ReaderStep::ReadGroup { first, count } => {
                    let mut seen = vec![false; count];
                    for _ in 0..count {
                        if !reader.read().map_err(|e| self.wrap(e, first))? {
                            return Err(self.missing_row(first, &seen));
                        }
                        let row = reader.value_buffer().map_err(|e| self.wrap(e, first))?;
                        let command = self.positioned_command(first, &mut seen, &row)?;
                        self.propagate(command, &row)?;
                    }
                    reader.next_result().map_err(|e| self.wrap(e, first))?;
                }
            }
        }
        Ok(())
    }

    /// Asynchronous [`ModificationCommandBatch::consume`].
    ///
    /// Checks `cancellation` before every move over the reader.
    pub async fn consume_async(
        &mut self,
        reader: &mut dyn AsyncDataReader,
        cancellation: &CancellationToken,
    ) -> UpdateResult<()> {
        for step in self.reader_steps()? {
            cancellation.check()?;
            match step {
                ReaderStep::SkipStatement { expecting } => {
                    let advanced = reader
                        .next_result_async()
                        .await
                        .map_err(|e| self.wrap(e, expecting))?;
                    if !advanced {
                        return Err(self.concurrency(expecting, 0));
                    }
                }
                ReaderStep::ReadRow {
                    command,
                    last_in_set,
                } => {
                    if !reader
                        .read_async()
                        .await
                        .map_err(|e| self.wrap(e, command))?
                    {
                        return Err(self.concurrency(command, 0));
                    }
                    let row = reader.value_buffer().map_err(|e| self.wrap(e, command))?;
                    self.propagate(command, &row)?;
                    if last_in_set {
                        reader
                            .next_result_async()
                            .await
                            .map_err(|e| self.wrap(e, command))?;
                    }
                }
                ReaderStep::ReadGroup { first, count } => {
                    let mut seen = vec![false; count];
                    for _ in 0..count {
                        cancellation.check()?;
                        if !reader
                            .read_async()
                            .await
                            .map_err(|e| self.wrap(e, first))?
                        {
                            return Err(self.missing_row(first, &seen));
                        }
                        let row = reader.value_buffer().map_err(|e| self.wrap(e, first))?;
                        let command = self.positioned_command(first, &mut seen, &row)?;
                        self.propagate(command, &row)?;
                    }
                    reader
                        .next_result_async()
                        .await
                        .map_err(|e| self.wrap(e, first))?;
                }
            }
        }
        Ok(())
    }

    fn reader_steps(&mut self) -> UpdateResult<Vec<ReaderStep>> {
        let positioning = self.options.positioning;
        let text = self.command_text()?;
        let mut steps = Vec::new();
        let mut skipped = 0;
        let mut index = 0;
        while index < text.mappings.len() {
            let mapping = text.mappings[index];
            if mapping == ResultSetMapping::NoResultSet {
                if text.ends_statement(index) {
                    skipped += 1;
                }
                index += 1;
                continue;
            }
            if positioning == ReaderPositioning::ResultPerStatement {
                steps.extend((0..skipped).map(|_| ReaderStep::SkipStatement { expecting: index }));
            }
            skipped = 0;
            if text.reads_by_position(index) {
                let end = (index..text.mappings.len())
                    .find(|&i| text.ends_statement(i))
                    .unwrap_or(text.mappings.len() - 1);
                steps.push(ReaderStep::ReadGroup {
                    first: index,
                    count: end - index + 1,
                });
                index = end + 1;
            } else {
                steps.push(ReaderStep::ReadRow {
                    command: index,
                    last_in_set: mapping == ResultSetMapping::LastInResultSet,
                });
                index += 1;
            }
        }
        Ok(steps)
    }

    /// Returns the command a grouped insert row belongs to, marking its
    /// position as seen.
    fn positioned_command(
        &self,
        first: usize,
        seen: &mut [bool],
        row: &ValueBuffer,
    ) -> UpdateResult<usize> {
        let position = row
            .len()
            .checked_sub(1)
            .and_then(|last| row.get(last))
            .and_then(Value::as_integer);
        match position.and_then(|p| usize::try_from(p).ok()) {
            Some(p) if p < seen.len() && !seen[p] => {
                seen[p] = true;
                Ok(first + p)
            }
            _ => Err(self.wrap(
                CoreError::data_reader(format!(
                    "grouped insert returned a row with position {position:?} for {} command(s)",
                    seen.len()
                )),
                first,
            )),
        }
    }

    /// The first command of a grouped insert that got no row.
    fn missing_row(&self, first: usize, seen: &[bool]) -> UpdateError {
        let missing = seen.iter().position(|s| !s).unwrap_or(0);
        self.concurrency(first + missing, 0)
    }

    fn propagate(&self, index: usize, row: &ValueBuffer) -> UpdateResult<()> {
        let command = &self.commands[index];
        if command.requires_result_propagation() {
            return command.propagate_results(row);
        }
        match row.get(0).and_then(Value::as_integer) {
            Some(1) => Ok(()),
            Some(actual) => Err(self.concurrency(index, actual)),
            None => Err(self.wrap(
                CoreError::data_reader("expected the affected row count in the first column"),
                index,
            )),
        }
    }

    fn concurrency(&self, index: usize, actual: i64) -> UpdateError {
        let command = &self.commands[index];
        tracing::warn!(
            table = command.table_name(),
            state = ?command.entity_state(),
            actual,
            "concurrency violation detected"
        );
        UpdateError::concurrency(actual, command.entries().to_vec())
    }

    fn wrap(&self, error: CoreError, index: usize) -> UpdateError {
        UpdateError::update(error, self.commands[index].entries().to_vec())
    }

    /// Returns the entries of every command in the batch.
    pub fn entries(&self) -> Vec<Arc<dyn UpdateEntry>> {
        self.commands
            .iter()
            .flat_map(|c| c.entries().iter().cloned())
            .collect()
    }
}

fn flush_grouping(
    generator: &dyn UpdateSqlGenerator,
    builder: &mut CommandBuilder<'_>,
    commands: &[ModificationCommand],
    grouping: &mut Vec<usize>,
    mappings: &mut [ResultSetMapping],
    statement_ends: &mut [bool],
    positioned: &mut [bool],
) -> UpdateResult<()> {
    let Some(&last) = grouping.last() else {
        return Ok(());
    };
    let members: Vec<&ModificationCommand> = grouping.iter().map(|&i| &commands[i]).collect();
    let mapping = generator.append_bulk_insert_operation(builder, &members)?;
    let shared = match mapping {
        ResultSetMapping::LastInResultSet => ResultSetMapping::NotLastInResultSet,
        other => other,
    };
    let by_position = members.len() > 1 && mapping == ResultSetMapping::LastInResultSet;
    for &index in grouping.iter() {
        mappings[index] = shared;
        statement_ends[index] = false;
        positioned[index] = by_position;
    }
    mappings[last] = mapping;
    statement_ends[last] = true;
    grouping.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_generator::{ReturningUpdateSqlGenerator, SqlServerUpdateSqlGenerator};
    use entiorm_core::{EntityEntry, EntityType, Property, ScalarType};

    fn blog_type() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap()
    }

    fn tag_type() -> Arc<EntityType> {
        EntityType::builder("Tag")
            .table("Tags")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Label", ScalarType::Text))
            .build()
            .unwrap()
    }

    fn added(et: &Arc<EntityType>, name: &str) -> ModificationCommand {
        let entry: Arc<dyn UpdateEntry> = Arc::new(EntityEntry::new(
            et.clone(),
            vec![0.into(), name.into()],
            EntityState::Added,
        ));
        ModificationCommand::for_entry(entry).unwrap()
    }

    fn batch(generator: Arc<dyn UpdateSqlGenerator>, options: BatchOptions) -> ModificationCommandBatch {
        ModificationCommandBatch::new(generator, options)
    }

    #[test]
    fn admission_stops_at_the_row_limit() {
        let blog = blog_type();
        let mut b = batch(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::new(2, 100).unwrap(),
        );
        assert!(b.try_add_command(added(&blog, "a")).is_ok());
        assert!(b.try_add_command(added(&blog, "b")).is_ok());
        assert!(b.try_add_command(added(&blog, "c")).is_err());
        assert_eq!(b.len(), 2);
        assert_eq!(b.parameter_count(), 2);
    }

    #[test]
    fn admission_rejects_reaching_the_parameter_limit() {
        let blog = blog_type();
        let mut b = batch(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::new(10, 3).unwrap(),
        );
        assert!(b.try_add_command(added(&blog, "a")).is_ok());
        assert!(b.try_add_command(added(&blog, "b")).is_ok());
        let rejected = b.try_add_command(added(&blog, "c")).unwrap_err();
        assert_eq!(rejected.table_name(), "Blogs");
    }

    #[test]
    fn alternating_tables_produce_three_groupings() {
        let blog = blog_type();
        let tag = tag_type();
        let mut b = batch(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::default(),
        );
        for command in [
            added(&blog, "a"),
            added(&blog, "b"),
            added(&tag, "x"),
            added(&blog, "c"),
        ] {
            b.try_add_command(command).unwrap();
        }

        let text = b.command_text().unwrap();
        assert_eq!(text.command.text.matches("MERGE ").count(), 1);
        assert_eq!(text.command.text.matches("INSERT INTO").count(), 2);
        assert_eq!(
            text.mappings,
            vec![
                ResultSetMapping::NotLastInResultSet,
                ResultSetMapping::LastInResultSet,
                ResultSetMapping::LastInResultSet,
                ResultSetMapping::LastInResultSet,
            ]
        );
        assert!(!text.ends_statement(0));
        assert!(text.ends_statement(1));
        assert!(text.reads_by_position(0) && text.reads_by_position(1));
        assert!(!text.reads_by_position(2));

        assert_eq!(
            b.reader_steps().unwrap(),
            vec![
                ReaderStep::ReadGroup { first: 0, count: 2 },
                ReaderStep::ReadRow {
                    command: 2,
                    last_in_set: true
                },
                ReaderStep::ReadRow {
                    command: 3,
                    last_in_set: true
                },
            ]
        );
    }

    #[test]
    fn returning_stores_group_only_inserts_without_reads() {
        let blog = blog_type();
        let keyed = |id: i64| {
            let entry: Arc<dyn UpdateEntry> = Arc::new(EntityEntry::new(
                blog.clone(),
                vec![id.into(), "keyed".into()],
                EntityState::Added,
            ));
            ModificationCommand::for_entry(entry).unwrap()
        };
        let mut b = batch(
            Arc::new(ReturningUpdateSqlGenerator::new()),
            BatchOptions::default(),
        );
        for command in [keyed(1), keyed(2), added(&blog, "a"), added(&blog, "b")] {
            b.try_add_command(command).unwrap();
        }

        let text = b.command_text().unwrap();
        assert_eq!(text.command.text.matches("INSERT INTO").count(), 3);
        assert_eq!(
            text.mappings,
            vec![
                ResultSetMapping::NoResultSet,
                ResultSetMapping::NoResultSet,
                ResultSetMapping::LastInResultSet,
                ResultSetMapping::LastInResultSet,
            ]
        );
        assert!((0..4).all(|i| !text.reads_by_position(i)));
    }

    #[test]
    fn text_is_cached_until_a_command_is_added() {
        let blog = blog_type();
        let mut b = batch(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::default(),
        );
        b.try_add_command(added(&blog, "a")).unwrap();
        let first = b.command_text().unwrap().clone();
        assert_eq!(b.command_text().unwrap(), &first);

        b.try_add_command(added(&blog, "b")).unwrap();
        let second = b.command_text().unwrap().clone();
        assert_ne!(second, first);
        assert!(second.command.text.contains("@inserted0"));

        b.reset_command_text();
        assert_eq!(b.command_text().unwrap(), &second);
    }

    #[test]
    fn bulk_insert_can_be_disabled() {
        let blog = blog_type();
        let mut b = batch(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::default().with_bulk_insert(false),
        );
        b.try_add_command(added(&blog, "a")).unwrap();
        b.try_add_command(added(&blog, "b")).unwrap();
        let text = b.command_text().unwrap();
        assert_eq!(text.command.text.matches("scope_identity()").count(), 2);
        assert!(!text.command.text.contains("@inserted"));
    }

    #[test]
    fn skipped_statements_are_attributed_to_the_next_reading_command() {
        let blog = blog_type();
        let client_keyed: Arc<dyn UpdateEntry> = Arc::new(EntityEntry::new(
            blog.clone(),
            vec![9.into(), "keyed".into()],
            EntityState::Added,
        ));
        let mut b = batch(
            Arc::new(ReturningUpdateSqlGenerator::new()),
            BatchOptions::default()
                .with_bulk_insert(false)
                .with_positioning(ReaderPositioning::ResultPerStatement),
        );
        b.try_add_command(ModificationCommand::for_entry(client_keyed).unwrap())
            .unwrap();
        b.try_add_command(added(&blog, "generated")).unwrap();

        assert_eq!(
            b.reader_steps().unwrap(),
            vec![
                ReaderStep::SkipStatement { expecting: 1 },
                ReaderStep::ReadRow {
                    command: 1,
                    last_in_set: true
                },
            ]
        );
    }
}
