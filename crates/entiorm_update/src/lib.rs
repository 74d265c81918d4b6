//! # entiorm Update
//!
//! The update pipeline: turns tracked entries into SQL, runs it in batches,
//! and reconciles the results.
//!
//! This crate provides:
//! - Column modifications and modification commands (one command per row)
//! - Update SQL generators for SQL Server and `RETURNING` dialects
//! - Modification command batches with admission control, grouped inserts
//!   and cached command text
//! - Reader consumption with optimistic concurrency detection, sync and async
//! - A batch preparer and a save pipeline that commits generated values only
//!   once every batch succeeded
//! - A sequence-backed block source for hi-lo key generation
//!
//! ## Key Invariants
//!
//! - All entries of a command share one saved state
//! - A batch never reaches the provider's parameter limit or exceeds its
//!   row limit; a command that cannot fit an empty batch is rejected
//! - Generated rows of a grouped insert are matched to commands by position
//! - Parameter names, once assigned, never change
//! - A missing result row is a concurrency violation, never a generic error

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod column_modification;
mod config;
mod error;
mod modification_command;
mod pipeline;
mod preparer;
mod sequence;
pub mod sql_generator;

pub use batch::{BatchCommandText, ModificationCommandBatch};
pub use column_modification::{ColumnFlags, ColumnModification, ParameterNameGenerator};
pub use config::{BatchOptions, ReaderPositioning};
pub use error::{UpdateError, UpdateResult};
pub use modification_command::ModificationCommand;
pub use pipeline::UpdatePipeline;
pub use preparer::CommandBatchPreparer;
pub use sequence::SequenceBlockSource;
pub use sql_generator::{
    CommandBuilder, ResultSetMapping, ReturningUpdateSqlGenerator, SqlServerUpdateSqlGenerator,
    UpdateSqlGenerator,
};
