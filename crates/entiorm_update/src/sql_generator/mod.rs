//! Update SQL generation.
//!
//! An [`UpdateSqlGenerator`] appends the statements for one
//! [`ModificationCommand`] to a [`CommandBuilder`] and reports how the
//! command's results appear in the reader:
//!
//! - **Insert**: writes client values; store-generated columns are returned
//!   when present
//! - **Update**: writes modified columns guarded by key and concurrency-token
//!   conditions, then checks the affected row count
//! - **Delete**: guarded by the same conditions, then checks the affected
//!   row count
//!
//! Two dialects ship with the crate: [`SqlServerUpdateSqlGenerator`] and
//! [`ReturningUpdateSqlGenerator`].

mod returning;
mod sql_server;

pub use returning::ReturningUpdateSqlGenerator;
pub use sql_server::SqlServerUpdateSqlGenerator;

use crate::column_modification::{ColumnModification, ParameterNameGenerator};
use crate::error::{UpdateError, UpdateResult};
use crate::modification_command::ModificationCommand;
use entiorm_core::{CommandParameter, EntityState, RelationalCommand, SqlGenerationHelper};
use std::fmt;

/// Where a command's result row sits in the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSetMapping {
    /// The command returns nothing.
    NoResultSet,
    /// The command's row is followed by other commands' rows in the same
    /// result set.
    NotLastInResultSet,
    /// The command's row is the last one of its result set.
    LastInResultSet,
}

/// Accumulates command text and the parameters it references.
pub struct CommandBuilder<'a> {
    helper: &'a SqlGenerationHelper,
    names: &'a mut ParameterNameGenerator,
    sql: String,
    parameters: Vec<CommandParameter>,
    table_variables: usize,
}

impl<'a> CommandBuilder<'a> {
    /// Creates an empty builder.
    pub fn new(helper: &'a SqlGenerationHelper, names: &'a mut ParameterNameGenerator) -> Self {
        Self {
            helper,
            names,
            sql: String::new(),
            parameters: Vec::new(),
            table_variables: 0,
        }
    }

    /// Returns the text built so far.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the dialect helper.
    pub fn helper(&self) -> &SqlGenerationHelper {
        self.helper
    }

    /// Appends raw text.
    pub fn push_str(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Appends a quoted identifier.
    pub fn push_identifier(&mut self, name: &str) {
        self.helper.append_delimited(&mut self.sql, name);
    }

    /// Appends a quoted, schema-qualified table name.
    pub fn push_table(&mut self, name: &str, schema: Option<&str>) {
        if let Some(schema) = schema {
            self.push_identifier(schema);
            self.sql.push('.');
        }
        self.push_identifier(name);
    }

    /// Appends quoted column names separated by commas.
    pub fn push_column_list<'c>(&mut self, columns: impl IntoIterator<Item = &'c ColumnModification>) {
        for (i, column) in columns.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_identifier(column.column_name());
        }
    }

    /// Ends a statement.
    pub fn push_terminator(&mut self) {
        self.sql.push_str(self.helper.statement_terminator());
        self.sql.push('\n');
    }

    /// Returns the placeholder for a column's current value, registering the
    /// parameter on first use.
    pub fn current_value_parameter(&mut self, column: &ColumnModification) -> String {
        let placeholder = self.helper.parameter_name(column.parameter_name(self.names));
        self.register(&placeholder, || column.value());
        placeholder
    }

    /// Returns the placeholder for a column's original value, registering the
    /// parameter on first use.
    pub fn original_value_parameter(&mut self, column: &ColumnModification) -> String {
        let placeholder = self
            .helper
            .parameter_name(column.original_parameter_name(self.names));
        self.register(&placeholder, || column.original_value());
        placeholder
    }

    /// Declares a new local table variable name (`@inserted0`, ...).
    pub fn next_table_variable(&mut self) -> String {
        let name = self
            .helper
            .parameter_name(&format!("inserted{}", self.table_variables));
        self.table_variables += 1;
        name
    }

    /// Returns the number of registered parameters.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Finishes the command.
    pub fn finish(self) -> RelationalCommand {
        RelationalCommand::new(self.sql, self.parameters)
    }

    fn register(&mut self, placeholder: &str, value: impl FnOnce() -> entiorm_core::Value) {
        if !self.parameters.iter().any(|p| p.name == placeholder) {
            self.parameters
                .push(CommandParameter::input(placeholder, value()));
        }
    }
}

/// Dialect-specific statement generation for the update pipeline.
///
/// The provided methods render the clauses every dialect shares; dialects
/// implement the three operations, grouped inserts and sequence reads.
pub trait UpdateSqlGenerator: fmt::Debug + Send + Sync {
    /// Short dialect name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Returns the identifier and parameter conventions.
    fn helper(&self) -> &SqlGenerationHelper;

    /// Appends text that precedes every batch.
    fn append_batch_header(&self, _builder: &mut CommandBuilder<'_>) {}

    /// Appends an INSERT for an `Added` command.
    fn append_insert_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping>;

    /// Appends an UPDATE for a `Modified` command.
    fn append_update_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping>;

    /// Appends a DELETE for a `Deleted` command.
    fn append_delete_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping>;

    /// Appends one multi-row insert for compatible `Added` commands.
    ///
    /// Returns the mapping of the last command; the others share its result
    /// set. When several commands read generated values, the store may
    /// return their rows in any order, so each row ends with the position
    /// of its command in `commands`.
    fn append_bulk_insert_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        commands: &[&ModificationCommand],
    ) -> UpdateResult<ResultSetMapping>;

    /// True when grouped inserts can tag generated rows with their
    /// positions. Otherwise only inserts without generated values are
    /// grouped.
    fn returns_grouped_row_positions(&self) -> bool {
        false
    }

    /// Appends a query returning the next value of a sequence.
    fn append_next_sequence_value_operation(
        &self,
        sql: &mut String,
        name: &str,
        schema: Option<&str>,
    );

    /// Returns the statement reading the next value of a sequence.
    fn next_sequence_value_sql(&self, name: &str, schema: Option<&str>) -> String {
        let mut sql = String::new();
        self.append_next_sequence_value_operation(&mut sql, name, schema);
        sql
    }

    /// Appends the statement matching the command's state.
    fn append_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        match command.entity_state() {
            EntityState::Added => self.append_insert_operation(builder, command),
            EntityState::Modified => self.append_update_operation(builder, command),
            EntityState::Deleted => self.append_delete_operation(builder, command),
            state => Err(UpdateError::invalid_argument(format!(
                "no statement for a command in state {state:?}"
            ))),
        }
    }

    /// Appends `INSERT INTO t (a, b)` and a newline.
    fn append_insert_header(&self, builder: &mut CommandBuilder<'_>, command: &ModificationCommand) {
        builder.push_str("INSERT INTO ");
        builder.push_table(command.table_name(), command.schema());
        let writes: Vec<_> = command.write_columns().collect();
        if !writes.is_empty() {
            builder.push_str(" (");
            builder.push_column_list(writes);
            builder.push_str(")");
        }
        builder.push_str("\n");
    }

    /// Appends `(@p0, @p1)` for the command's write columns.
    fn append_values_row(&self, builder: &mut CommandBuilder<'_>, command: &ModificationCommand) {
        builder.push_str("(");
        for (i, column) in command.write_columns().enumerate() {
            if i > 0 {
                builder.push_str(", ");
            }
            let placeholder = builder.current_value_parameter(column);
            builder.push_str(&placeholder);
        }
        builder.push_str(")");
    }

    /// Appends `VALUES (...)`, or the default-values form when nothing is
    /// written.
    fn append_values_clause(&self, builder: &mut CommandBuilder<'_>, command: &ModificationCommand) {
        if command.write_columns().next().is_none() {
            builder.push_str("DEFAULT VALUES");
        } else {
            builder.push_str("VALUES ");
            self.append_values_row(builder, command);
        }
    }

    /// Appends `UPDATE t SET a = @p0, b = @p1` and a newline.
    fn append_update_header(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<()> {
        if command.write_columns().next().is_none() {
            return Err(UpdateError::invalid_argument(format!(
                "no modified columns to update in table '{}'",
                command.table_name()
            )));
        }
        builder.push_str("UPDATE ");
        builder.push_table(command.table_name(), command.schema());
        builder.push_str(" SET ");
        for (i, column) in command.write_columns().enumerate() {
            if i > 0 {
                builder.push_str(", ");
            }
            builder.push_identifier(column.column_name());
            builder.push_str(" = ");
            let placeholder = builder.current_value_parameter(column);
            builder.push_str(&placeholder);
        }
        builder.push_str("\n");
        Ok(())
    }

    /// Appends `DELETE FROM t` and a newline.
    fn append_delete_header(&self, builder: &mut CommandBuilder<'_>, command: &ModificationCommand) {
        builder.push_str("DELETE FROM ");
        builder.push_table(command.table_name(), command.schema());
        builder.push_str("\n");
    }

    /// Appends `WHERE` with every condition column joined by `AND`.
    fn append_where_clause(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<()> {
        let conditions: Vec<_> = command.condition_columns().collect();
        if conditions.is_empty() {
            return Err(UpdateError::invalid_argument(format!(
                "no key columns to locate the row in table '{}'",
                command.table_name()
            )));
        }
        builder.push_str("WHERE ");
        for (i, column) in conditions.into_iter().enumerate() {
            if i > 0 {
                builder.push_str(" AND ");
            }
            self.append_where_condition(builder, column);
        }
        Ok(())
    }

    /// Appends `c = @p` against the original value, or `c IS NULL`.
    fn append_where_condition(&self, builder: &mut CommandBuilder<'_>, column: &ColumnModification) {
        builder.push_identifier(column.column_name());
        if column.uses_original_value_parameter() {
            builder.push_str(" = ");
            let placeholder = builder.original_value_parameter(column);
            builder.push_str(&placeholder);
        } else {
            builder.push_str(" IS NULL");
        }
    }

    /// Appends the condition locating a row by a key column after the
    /// statement that wrote it.
    fn append_identity_where_condition(
        &self,
        builder: &mut CommandBuilder<'_>,
        column: &ColumnModification,
    ) {
        if column.is_write() {
            builder.push_identifier(column.column_name());
            builder.push_str(" = ");
            let placeholder = builder.current_value_parameter(column);
            builder.push_str(&placeholder);
        } else {
            self.append_where_condition(builder, column);
        }
    }
}

/// True when two `Added` commands can share one multi-row insert.
pub fn can_group_inserts(first: &ModificationCommand, next: &ModificationCommand) -> bool {
    fn names<'c>(columns: impl Iterator<Item = &'c ColumnModification>) -> Vec<&'c str> {
        columns.map(ColumnModification::column_name).collect()
    }

    first.entity_state() == EntityState::Added
        && next.entity_state() == EntityState::Added
        && first.table_name() == next.table_name()
        && first.schema() == next.schema()
        && first.write_columns().next().is_some()
        && names(first.write_columns()) == names(next.write_columns())
        && names(first.read_columns()) == names(next.read_columns())
}
