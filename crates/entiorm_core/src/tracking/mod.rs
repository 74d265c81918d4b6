//! Change-tracking contracts.
//!
//! The update pipeline sees tracked entities only through [`UpdateEntry`].
//! [`EntityEntry`] and [`StateManager`] are a compact reference
//! implementation used by the query pipeline for identity resolution and by
//! tests; snapshotting and graph fix-up are out of scope.

mod entry;
mod state_manager;

pub use entry::{EntityEntry, EntityState, UpdateEntry};
pub use state_manager::StateManager;
