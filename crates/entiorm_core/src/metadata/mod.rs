//! Model metadata contracts.
//!
//! The pipelines consume metadata only through these types: an entity type
//! exposes its ordered property list and table mapping, a property exposes
//! its scalar type, key/concurrency flags and store-generation
//! classification. Model building conventions live elsewhere.

mod entity_type;
mod model;
mod property;

pub use entity_type::{EntityType, EntityTypeBuilder};
pub use model::Model;
pub use property::{Property, ValueGenerated};
