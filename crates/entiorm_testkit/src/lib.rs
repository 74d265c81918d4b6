//! # entiorm Testkit
//!
//! Test utilities for entiorm.
//!
//! This crate provides:
//! - A small blogging model with seed rows
//! - Scripted data readers and a recording connection
//! - Property-based test generators using proptest
//! - One-shot tracing setup for test binaries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entiorm_testkit::prelude::*;
//!
//! #[test]
//! fn reads_one_row() {
//!     let connection = FakeConnection::new();
//!     connection.push_result(ScriptedResult::rows(vec![vec![1.into()]]));
//!     // ... execute a command against `connection`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fakes;
pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
