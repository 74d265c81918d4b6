//! Client-side value generation for keys.
//!
//! Generators may be shared by concurrent save operations and never hand out
//! the same value twice.

mod guid;
mod hilo;

pub use guid::GuidValueGenerator;
pub use hilo::{BlockSource, HiLoValueGenerator};

use crate::error::CoreResult;
use crate::value::Value;

/// Produces values for a property before an entity is inserted.
pub trait ValueGenerator: Send + Sync {
    /// Returns the next value.
    fn next_value(&self) -> CoreResult<Value>;

    /// Returns true if generated values are placeholders replaced by the store
    /// on insert.
    fn generates_temporary_values(&self) -> bool {
        false
    }
}
