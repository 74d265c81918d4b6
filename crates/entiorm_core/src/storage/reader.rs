//! Data reader contracts.

use crate::error::{CoreError, CoreResult};
use crate::value::{Value, ValueBuffer};
use async_trait::async_trait;

/// A forward-only reader over one or more result sets.
pub trait DataReader: Send {
    /// Advances to the next row of the current result set.
    fn read(&mut self) -> CoreResult<bool>;

    /// Advances to the next result set.
    fn next_result(&mut self) -> CoreResult<bool>;

    /// Returns the number of columns in the current row.
    fn field_count(&self) -> usize;

    /// Returns the value of a column in the current row.
    fn get_value(&self, ordinal: usize) -> CoreResult<Value>;

    /// Returns the number of rows the statements changed, or `-1` if unknown.
    fn records_affected(&self) -> i64 {
        -1
    }

    /// Copies the current row into a value buffer.
    fn value_buffer(&self) -> CoreResult<ValueBuffer> {
        (0..self.field_count())
            .map(|i| self.get_value(i))
            .collect::<CoreResult<Vec<_>>>()
            .map(ValueBuffer::new)
    }

    /// Reads column `ordinal` of the current row as an integer.
    fn get_integer(&self, ordinal: usize) -> CoreResult<i64> {
        let value = self.get_value(ordinal)?;
        value.as_integer().ok_or_else(|| {
            CoreError::type_mismatch("integer", format!("{value}"))
        })
    }
}

/// Asynchronous counterpart of [`DataReader`].
///
/// Suspension happens only when advancing to a row or a result set.
#[async_trait]
pub trait AsyncDataReader: Send {
    /// Advances to the next row of the current result set.
    async fn read_async(&mut self) -> CoreResult<bool>;

    /// Advances to the next result set.
    async fn next_result_async(&mut self) -> CoreResult<bool>;

    /// Returns the number of columns in the current row.
    fn field_count(&self) -> usize;

    /// Returns the value of a column in the current row.
    fn get_value(&self, ordinal: usize) -> CoreResult<Value>;

    /// Copies the current row into a value buffer.
    fn value_buffer(&self) -> CoreResult<ValueBuffer> {
        (0..self.field_count())
            .map(|i| self.get_value(i))
            .collect::<CoreResult<Vec<_>>>()
            .map(ValueBuffer::new)
    }

    /// Reads column `ordinal` of the current row as an integer.
    fn get_integer(&self, ordinal: usize) -> CoreResult<i64> {
        let value = self.get_value(ordinal)?;
        value.as_integer().ok_or_else(|| {
            CoreError::type_mismatch("integer", format!("{value}"))
        })
    }
}
