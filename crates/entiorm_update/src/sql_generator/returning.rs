//! Update statements for stores with a `RETURNING` clause.

use super::{CommandBuilder, ResultSetMapping, UpdateSqlGenerator};
use crate::error::{UpdateError, UpdateResult};
use crate::modification_command::ModificationCommand;
use entiorm_core::SqlGenerationHelper;

/// Generates statements that return generated values with `RETURNING`.
///
/// Updates and deletes without generated values end in `RETURNING 1`, so an
/// affected row shows up as a result row holding `1`. Inserts are grouped
/// only when they read nothing back.
#[derive(Debug, Clone)]
pub struct ReturningUpdateSqlGenerator {
    helper: SqlGenerationHelper,
}

impl ReturningUpdateSqlGenerator {
    /// Creates the generator with ANSI quoting.
    pub fn new() -> Self {
        Self {
            helper: SqlGenerationHelper::ansi(),
        }
    }

    fn append_returning(&self, builder: &mut CommandBuilder<'_>, command: &ModificationCommand) {
        builder.push_str("\nRETURNING ");
        if command.requires_result_propagation() {
            builder.push_column_list(command.read_columns());
        } else {
            builder.push_str("1");
        }
    }
}

impl Default for ReturningUpdateSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateSqlGenerator for ReturningUpdateSqlGenerator {
    fn name(&self) -> &'static str {
        "Returning"
    }

    fn helper(&self) -> &SqlGenerationHelper {
        &self.helper
    }

    fn append_insert_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        self.append_insert_header(builder, command);
        self.append_values_clause(builder, command);
        let mapping = if command.requires_result_propagation() {
            self.append_returning(builder, command);
            ResultSetMapping::LastInResultSet
        } else {
            ResultSetMapping::NoResultSet
        };
        builder.push_terminator();
        Ok(mapping)
    }

    fn append_update_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        self.append_update_header(builder, command)?;
        self.append_where_clause(builder, command)?;
        self.append_returning(builder, command);
        builder.push_terminator();
        Ok(ResultSetMapping::LastInResultSet)
    }

    fn append_delete_operation(
        &self,
        builder: &mut CommandBuilder<'_>,
        command: &ModificationCommand,
    ) -> UpdateResult<ResultSetMapping> {
        self.append_delete_header(builder, command);
        self.append_where_clause(builder, command)?;
        self.append_returning(builder, command);
        builder.push_terminator();
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

        // RETURNING cannot name the VALUES row a generated row came from.
        if first.requires_result_propagation() {
            return Err(UpdateError::invalid_argument(format!(
                "grouped inserts into '{}' cannot return generated values",
                first.table_name()
            )));
        }

        self.append_insert_header(builder, first);
        builder.push_str("VALUES ");
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                builder.push_str(",\n");
            }
            self.append_values_row(builder, command);
        }
        builder.push_terminator();
        Ok(ResultSetMapping::NoResultSet)
    }

    fn append_next_sequence_value_operation(
        &self,
        sql: &mut String,
        name: &str,
        schema: Option<&str>,
    ) {
        let qualified = self.helper.delimit_identifier_with_schema(name, schema);
        sql.push_str("SELECT nextval('");
        sql.push_str(&qualified.replace('\'', "''"));
        sql.push_str("')");
        sql.push_str(self.helper.statement_terminator());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_modification::ParameterNameGenerator;
    use entiorm_core::{EntityEntry, EntityState, EntityType, Property, ScalarType, UpdateEntry};
    use std::sync::Arc;

    fn blog_type() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap()
    }

    fn command(values: Vec<entiorm_core::Value>, state: EntityState) -> ModificationCommand {
        let entry: Arc<dyn UpdateEntry> = Arc::new(EntityEntry::new(blog_type(), values, state));
        ModificationCommand::for_entry(entry).unwrap()
    }

    fn render(commands: &[&ModificationCommand]) -> (String, ResultSetMapping) {
        let generator = ReturningUpdateSqlGenerator::new();
        let mut names = ParameterNameGenerator::new();
        let mut builder = CommandBuilder::new(generator.helper(), &mut names);
        let mapping = if commands.len() == 1 {
            generator.append_operation(&mut builder, commands[0]).unwrap()
        } else {
            generator
                .append_bulk_insert_operation(&mut builder, commands)
                .unwrap()
        };
        (builder.sql().to_owned(), mapping)
    }

    #[test]
    fn insert_returns_generated_columns() {
        let cmd = command(vec![0.into(), "rust".into()], EntityState::Added);
        let (sql, mapping) = render(&[&cmd]);
        assert_eq!(
            sql,
            "INSERT INTO \"Blogs\" (\"Name\")\nVALUES (@p0)\nRETURNING \"Id\";\n"
        );
        assert_eq!(mapping, ResultSetMapping::LastInResultSet);
    }

    #[test]
    fn delete_returns_one_per_affected_row() {
        let cmd = command(vec![4.into(), "x".into()], EntityState::Deleted);
        let (sql, mapping) = render(&[&cmd]);
        assert_eq!(sql, "DELETE FROM \"Blogs\"\nWHERE \"Id\" = @p0\nRETURNING 1;\n");
        assert_eq!(mapping, ResultSetMapping::LastInResultSet);
    }

    #[test]
    fn grouped_insert_uses_multi_row_values() {
        let a = command(vec![1.into(), "a".into()], EntityState::Added);
        let b = command(vec![2.into(), "b".into()], EntityState::Added);
        let c = command(vec![3.into(), "c".into()], EntityState::Added);
        let (sql, mapping) = render(&[&a, &b, &c]);
        assert_eq!(
            sql,
            "INSERT INTO \"Blogs\" (\"Id\", \"Name\")\n\
             VALUES (@p0, @p1),\n(@p2, @p3),\n(@p4, @p5);\n"
        );
        assert_eq!(mapping, ResultSetMapping::NoResultSet);
    }

    #[test]
    fn grouped_insert_with_generated_values_is_rejected() {
        let a = command(vec![0.into(), "a".into()], EntityState::Added);
        let b = command(vec![0.into(), "b".into()], EntityState::Added);
        let generator = ReturningUpdateSqlGenerator::new();
        let mut names = ParameterNameGenerator::new();
        let mut builder = CommandBuilder::new(generator.helper(), &mut names);
        assert!(!generator.returns_grouped_row_positions());
        assert!(matches!(
            generator.append_bulk_insert_operation(&mut builder, &[&a, &b]),
            Err(UpdateError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn sequence_value_syntax() {
        let generator = ReturningUpdateSqlGenerator::new();
        assert_eq!(
            generator.next_sequence_value_sql("blog_ids", None),
            "SELECT nextval('\"blog_ids\"');"
        );
    }
}
