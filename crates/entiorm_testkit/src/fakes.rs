//! Scripted storage doubles.
//!
//! [`FakeConnection`] records every command it executes and answers each one
//! with the next [`ScriptedResult`] from its queue.

use async_trait::async_trait;
use entiorm_core::{
    AsyncDataReader, CoreError, CoreResult, DataReader, RelationalCommand, RelationalConnection,
    Value, ValueBuffer,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// What a [`FakeConnection`] answers to one command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedResult {
    result_sets: Vec<Vec<ValueBuffer>>,
    records_affected: i64,
    failure: Option<String>,
}

impl ScriptedResult {
    /// A reader with no result sets.
    pub fn empty() -> Self {
        Self {
            records_affected: -1,
            ..Self::default()
        }
    }

    /// A reader with a single result set.
    pub fn rows(rows: Vec<Vec<Value>>) -> Self {
        Self::result_sets(vec![rows])
    }

    /// A reader with several result sets, in order.
    pub fn result_sets(sets: Vec<Vec<Vec<Value>>>) -> Self {
        Self {
            result_sets: sets
                .into_iter()
                .map(|rows| rows.into_iter().map(ValueBuffer::new).collect())
                .collect(),
            records_affected: -1,
            failure: None,
        }
    }

    /// Execution fails with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::empty()
        }
    }

    /// Sets the reader's `records_affected`.
    #[must_use]
    pub fn with_records_affected(mut self, count: i64) -> Self {
        self.records_affected = count;
        self
    }

    fn into_reader(self) -> CoreResult<FakeDataReader> {
        match self.failure {
            Some(message) => Err(CoreError::execution(message)),
            None => Ok(FakeDataReader::new(self.result_sets).with_records_affected(self.records_affected)),
        }
    }
}

/// A reader over in-memory result sets.
///
/// Starts positioned before the first row of the first result set.
#[derive(Debug, Clone)]
pub struct FakeDataReader {
    sets: Vec<Vec<ValueBuffer>>,
    set: usize,
    row: Option<usize>,
    records_affected: i64,
}

impl FakeDataReader {
    /// Creates a reader over `sets`.
    pub fn new(sets: Vec<Vec<ValueBuffer>>) -> Self {
        Self {
            sets,
            set: 0,
            row: None,
            records_affected: -1,
        }
    }

    /// Sets the value reported by `records_affected`.
    #[must_use]
    pub fn with_records_affected(mut self, count: i64) -> Self {
        self.records_affected = count;
        self
    }

    fn current(&self) -> Option<&ValueBuffer> {
        self.sets.get(self.set)?.get(self.row?)
    }
}

impl DataReader for FakeDataReader {
    fn read(&mut self) -> CoreResult<bool> {
        let Some(rows) = self.sets.get(self.set) else {
            return Ok(false);
        };
        let next = self.row.map_or(0, |r| r + 1).min(rows.len());
        self.row = Some(next);
        Ok(next < rows.len())
    }

    fn next_result(&mut self) -> CoreResult<bool> {
        if self.set < self.sets.len() {
            self.set += 1;
        }
        self.row = None;
        Ok(self.set < self.sets.len())
    }

    fn field_count(&self) -> usize {
        self.current().map_or(0, ValueBuffer::len)
    }

    fn get_value(&self, ordinal: usize) -> CoreResult<Value> {
        let row = self
            .current()
            .ok_or_else(|| CoreError::data_reader("reader is not positioned on a row"))?;
        row.get(ordinal).cloned().ok_or_else(|| {
            CoreError::data_reader(format!(
                "ordinal {ordinal} is out of range for a row of {} columns",
                row.len()
            ))
        })
    }

    fn records_affected(&self) -> i64 {
        self.records_affected
    }
}

/// Asynchronous wrapper over a [`FakeDataReader`].
#[derive(Debug, Clone)]
pub struct FakeAsyncDataReader {
    inner: FakeDataReader,
}

impl FakeAsyncDataReader {
    /// Wraps a scripted reader.
    pub fn new(inner: FakeDataReader) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AsyncDataReader for FakeAsyncDataReader {
    async fn read_async(&mut self) -> CoreResult<bool> {
        self.inner.read()
    }

    async fn next_result_async(&mut self) -> CoreResult<bool> {
        self.inner.next_result()
    }

    fn field_count(&self) -> usize {
        self.inner.field_count()
    }

    fn get_value(&self, ordinal: usize) -> CoreResult<Value> {
        self.inner.get_value(ordinal)
    }
}

/// A connection that records commands and replays scripted results.
#[derive(Debug, Default)]
pub struct FakeConnection {
    results: Mutex<VecDeque<ScriptedResult>>,
    commands: Mutex<Vec<RelationalCommand>>,
}

impl FakeConnection {
    /// Creates a connection with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connection that answers with `results` in order.
    pub fn with_results(results: impl IntoIterator<Item = ScriptedResult>) -> Self {
        let connection = Self::new();
        connection.results.lock().extend(results);
        connection
    }

    /// Queues the answer to a later command.
    pub fn push_result(&self, result: ScriptedResult) {
        self.results.lock().push_back(result);
    }

    /// Returns every command executed so far.
    pub fn commands(&self) -> Vec<RelationalCommand> {
        self.commands.lock().clone()
    }

    /// Returns the most recent command.
    pub fn last_command(&self) -> Option<RelationalCommand> {
        self.commands.lock().last().cloned()
    }

    /// Returns the number of commands executed.
    pub fn command_count(&self) -> usize {
        self.commands.lock().len()
    }

    /// Returns the number of scripted results not yet consumed.
    pub fn pending_results(&self) -> usize {
        self.results.lock().len()
    }

    fn next_reader(&self, command: &RelationalCommand) -> CoreResult<FakeDataReader> {
        self.commands.lock().push(command.clone());
        tracing::trace!(sql = %command.text, "fake connection executing command");
        self.results
            .lock()
            .pop_front()
            .ok_or_else(|| {
                CoreError::execution(format!("no scripted result for command: {}", command.text))
            })?
            .into_reader()
    }
}

#[async_trait]
impl RelationalConnection for FakeConnection {
    fn execute_reader(&self, command: &RelationalCommand) -> CoreResult<Box<dyn DataReader>> {
        Ok(Box::new(self.next_reader(command)?))
    }

    async fn execute_reader_async(
        &self,
        command: &RelationalCommand,
    ) -> CoreResult<Box<dyn AsyncDataReader>> {
        Ok(Box::new(FakeAsyncDataReader::new(self.next_reader(command)?)))
    }
}
