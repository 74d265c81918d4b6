//! SQL Server update statements.

use super::{CommandBuilder, ResultSetMapping, UpdateSqlGenerator};
use crate::column_modification::ColumnModification;
use crate::error::{UpdateError, UpdateResult};
use crate::modification_command::ModificationCommand;
use entiorm_core::{ScalarType, SqlGenerationHelper};

/// Column carrying a grouped row's position in its insert.
const POSITION_COLUMN: &str = "_Position";

/// Generates SQL Server statements.
///
/// Generated values are read with a `SELECT` guarded by
/// `@@ROWCOUNT = 1`, identity keys through `scope_identity()`, and grouped
/// inserts through a `MERGE` whose `OUTPUT` lands in a table variable
/// along with each row's position.
#[derive(Debug, Clone)]
pub struct SqlServerUpdateSqlGenerator {
    helper: SqlGenerationHelper,
}

impl SqlServerUpdateSqlGenerator {
    /// Creates the generator.
    pub fn new() -> Self {
        Self {
            helper: SqlGenerationHelper::sql_server(),
        }
    }

    fn append_select_affected(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) {
        let reads: Vec<_> = command.read_columns().collect();
        builder.push_str("SELECT ");
        builder.push_column_list(reads);
        builder.push_str("\nFROM ");
        builder.push_table(command.table_name(), command.schema());
        builder.push_str("\nWHERE @@ROWCOUNT = 1");
        for key in command.key_columns() {
            builder.push_str(" AND ");
            self.append_identity_where_condition(builder, key);
        }
        builder.push_terminator();
    }

    fn append_select_affected_count(&self, builder: &mut CommandBuilder<'_>) {
        builder.push_str("SELECT @@ROWCOUNT");
        builder.push_terminator();
    }

    fn store_type(column: &ColumnModification) -> String {
        match column.property().store_type_name() {
            Some(t) if t.eq_ignore_ascii_case("rowversion") || t.eq_ignore_ascii_case("timestamp") => {
                "varbinary(8)".to_owned()
            }
            Some(t) => t.to_owned(),
            None => match column.property().scalar_type() {
                ScalarType::Bool => "bit",
                ScalarType::Integer => "bigint",
                ScalarType::Text => "nvarchar(max)",
                ScalarType::Bytes => "varbinary(max)",
                ScalarType::Guid => "uniqueidentifier",
            }
            .to_owned(),
        }
    }
}

impl Default for SqlServerUpdateSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateSqlGenerator for SqlServerUpdateSqlGenerator {
    fn name(&self) -> &'static str {
        "SqlServer"
    }

    fn helper(&self) -> &SqlGenerationHelper {
        &self.helper
    }

    fn append_batch_header(&self, builder: &mut CommandBuilder<'_>) {
        builder.push_str("SET NOCOUNT ON");
        builder.push_terminator();
    }

    fn append_insert_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        self.append_insert_header(builder, command);
        self.append_values_clause(builder, command);
        builder.push_terminator();

        if command.requires_result_propagation() {
            self.append_select_affected(builder, command);
            Ok(ResultSetMapping::LastInResultSet)
        } else {
            Ok(ResultSetMapping::NoResultSet)
        }
    }

    fn append_update_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        self.append_update_header(builder, command)?;
        self.append_where_clause(builder, command)?;
        builder.push_terminator();

        if command.requires_result_propagation() {
            self.append_select_affected(builder, command);
        } else {
            self.append_select_affected_count(builder);
        }
        Ok(ResultSetMapping::LastInResultSet)
    }

    fn append_delete_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        self.append_delete_header(builder, command);
        self.append_where_clause(builder, command)?;
        builder.push_terminator();
        self.append_select_affected_count(builder);
        Ok(ResultSetMapping::LastInResultSet)
    }

    fn append_bulk_insert_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        commands: &[&ModificationCommand],
    ) -> UpdateResult<ResultSetMapping> {
        let Some(&first) = commands.first() else {
            return Err(UpdateError::invalid_argument("no commands to insert"));
        };
        if commands.len() == 1 {
            return self.append_insert_operation(builder, first);
        }
        if first.write_columns().next().is_none() {
            return Err(UpdateError::invalid_argument(
                "grouped inserts need at least one written column",
            ));
        }

        let reads: Vec<_> = first.read_columns().collect();
        if reads.is_empty() {
            self.append_insert_header(builder, first);
            builder.push_str("VALUES ");
            for (i, command) in commands.iter().enumerate() {
                if i > 0 {
                    builder.push_str(",\n");
                }
                self.append_values_row(builder, command);
            }
            builder.push_terminator();
            return Ok(ResultSetMapping::NoResultSet);
        }

        let variable = builder.next_table_variable();
        builder.push_str("DECLARE ");
        builder.push_str(&variable);
        builder.push_str(" TABLE (");
        for column in &reads {
            builder.push_identifier(column.column_name());
            builder.push_str(" ");
            builder.push_str(&Self::store_type(column));
            builder.push_str(", ");
        }
        builder.push_identifier(POSITION_COLUMN);
        builder.push_str(" int)");
        builder.push_terminator();

        // MERGE lets OUTPUT see the source row, and with it the position.
        builder.push_str("MERGE ");
        builder.push_table(first.table_name(), first.schema());
        builder.push_str(" USING (\nVALUES ");
        for (position, command) in commands.iter().enumerate() {
            if position > 0 {
                builder.push_str(",\n");
            }
            builder.push_str("(");
            for column in command.write_columns() {
                let placeholder = builder.current_value_parameter(column);
                builder.push_str(&placeholder);
                builder.push_str(", ");
            }
            builder.push_str(&position.to_string());
            builder.push_str(")");
        }
        builder.push_str(") AS i (");
        builder.push_column_list(first.write_columns());
        builder.push_str(", ");
        builder.push_identifier(POSITION_COLUMN);
        builder.push_str(") ON 1=0\nWHEN NOT MATCHED THEN\nINSERT (");
        builder.push_column_list(first.write_columns());
        builder.push_str(")\nVALUES (");
        for (i, column) in first.write_columns().enumerate() {
            if i > 0 {
                builder.push_str(", ");
            }
            builder.push_str("i.");
            builder.push_identifier(column.column_name());
        }
        builder.push_str(")\nOUTPUT ");
        for column in &reads {
            builder.push_str("INSERTED.");
            builder.push_identifier(column.column_name());
            builder.push_str(", ");
        }
        builder.push_str("i.");
        builder.push_identifier(POSITION_COLUMN);
        builder.push_str("\nINTO ");
        builder.push_str(&variable);
        builder.push_terminator();

        builder.push_str("SELECT ");
        builder.push_column_list(reads);
        builder.push_str(", ");
        builder.push_identifier(POSITION_COLUMN);
        builder.push_str(" FROM ");
        builder.push_str(&variable);
        builder.push_str(" ORDER BY ");
        builder.push_identifier(POSITION_COLUMN);
        builder.push_terminator();
        Ok(ResultSetMapping::LastInResultSet)
    }

    fn returns_grouped_row_positions(&self) -> bool {
        true
    }

    fn append_identity_where_condition(
        &self,
        builder: &mut CommandBuilder<'_>,
        column: &ColumnModification,
    ) {
        if column.is_read() {
            builder.push_identifier(column.column_name());
            builder.push_str(" = scope_identity()");
        } else if column.is_write() {
            builder.push_identifier(column.column_name());
            builder.push_str(" = ");
            let placeholder = builder.current_value_parameter(column);
            builder.push_str(&placeholder);
        } else {
            self.append_where_condition(builder, column);
        }
    }

    fn append_next_sequence_value_operation(
        &self,
        sql: &mut String,
        name: &str,
        schema: Option<&str>,
    ) {
        sql.push_str("SELECT NEXT VALUE FOR ");
        sql.push_str(&self.helper.delimit_identifier_with_schema(name, schema));
        sql.push_str(self.helper.statement_terminator());
    }
}
