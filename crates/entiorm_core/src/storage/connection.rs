//! Connection contract.

use crate::error::CoreResult;
use crate::storage::{AsyncDataReader, DataReader, RelationalCommand};
use async_trait::async_trait;

/// Executes commands against a relational store.
///
/// Execution timeouts, transactions and connection lifetime are properties of
/// the implementation.
#[async_trait]
pub trait RelationalConnection: Send + Sync {
    /// Executes a command and returns a reader over its result sets.
    fn execute_reader(&self, command: &RelationalCommand) -> CoreResult<Box<dyn DataReader>>;

    /// Asynchronous counterpart of [`RelationalConnection::execute_reader`].
    async fn execute_reader_async(
        &self,
        command: &RelationalCommand,
    ) -> CoreResult<Box<dyn AsyncDataReader>>;
}
