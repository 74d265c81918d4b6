//! Storage contracts.
//!
//! The pipelines hand `(command text, parameters)` pairs to a
//! [`RelationalConnection`] and consume the rows through a [`DataReader`] or
//! [`AsyncDataReader`]. A reader starts positioned on its first result set;
//! `read` advances to the next row of the current result set and
//! `next_result` moves to the following result set.

mod command;
mod connection;
mod reader;

pub use command::{CommandParameter, ParameterDirection, RelationalCommand};
pub use connection::RelationalConnection;
pub use reader::{AsyncDataReader, DataReader};
