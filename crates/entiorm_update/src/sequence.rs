//! Hi-lo blocks read from a database sequence.

use crate::error::{UpdateError, UpdateResult};
use crate::sql_generator::UpdateSqlGenerator;
use entiorm_core::{BlockSource, CoreError, CoreResult, RelationalCommand, RelationalConnection};
use std::fmt;
use std::sync::Arc;

/// A [`BlockSource`] that reads the next value of a sequence.
pub struct SequenceBlockSource {
    connection: Arc<dyn RelationalConnection>,
    command: RelationalCommand,
}

impl SequenceBlockSource {
    /// Creates a source for sequence `name`, rendered by `generator`.
    pub fn new(
        connection: Arc<dyn RelationalConnection>,
        generator: &dyn UpdateSqlGenerator,
        name: &str,
        schema: Option<&str>,
    ) -> UpdateResult<Self> {
        if name.is_empty() {
            return Err(UpdateError::invalid_argument("sequence name is empty"));
        }
        Ok(Self {
            connection,
            command: RelationalCommand::new(generator.next_sequence_value_sql(name, schema), vec![]),
        })
    }

    /// Returns the query run for each block.
    pub fn sql(&self) -> &str {
        &self.command.text
    }
}

impl BlockSource for SequenceBlockSource {
    fn next_block_start(&self) -> CoreResult<i64> {
        let mut reader = self.connection.execute_reader(&self.command)?;
        if !reader.read()? {
            return Err(CoreError::data_reader(format!(
                "sequence query returned no rows: {}",
                self.command.text
            )));
        }
        reader.get_integer(0)
    }
}

impl fmt::Debug for SequenceBlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceBlockSource")
            .field("sql", &self.command.text)
            .finish_non_exhaustive()
    }
}
