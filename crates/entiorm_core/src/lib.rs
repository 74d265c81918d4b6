//! # entiorm Core
//!
//! Shared contracts for the entiorm query and update pipelines.
//!
//! This crate provides:
//! - Scalar values and value buffers (one physical row)
//! - Model metadata: entity types, properties, store-generation classification
//! - Change-tracking contracts and a reference identity map
//! - Storage contracts: commands, connections, sync and async data readers
//! - SQL generation helpers (identifier quoting, parameter naming, literals)
//! - Client-side value generators (HiLo, GUID)
//! - Configuration and cooperative cancellation
//!
//! ## Key Invariants
//!
//! - A property's index is its position in every value buffer for its entity
//! - A key is tracked at most once per state manager
//! - Store-generated values become visible only once a save succeeds

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
pub mod metadata;
mod sql;
pub mod storage;
pub mod tracking;
mod value;
pub mod value_generation;

pub use cancel::CancellationToken;
pub use config::{Config, QueryTrackingBehavior};
pub use error::{CoreError, CoreResult};
pub use metadata::{EntityType, EntityTypeBuilder, Model, Property, ValueGenerated};
pub use sql::SqlGenerationHelper;
pub use storage::{
    AsyncDataReader, CommandParameter, DataReader, ParameterDirection, RelationalCommand,
    RelationalConnection,
};
pub use tracking::{EntityEntry, EntityState, StateManager, UpdateEntry};
pub use value::{ScalarType, Value, ValueBuffer};
pub use value_generation::{BlockSource, GuidValueGenerator, HiLoValueGenerator, ValueGenerator};
