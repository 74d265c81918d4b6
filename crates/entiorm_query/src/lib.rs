//! # entiorm Query
//!
//! Query compilation for entiorm: operator trees in, shaped results out.
//!
//! This crate provides:
//! - An immutable, shareable expression tree with a stable printer
//! - Projection members, bindings and mappings that connect a shaper to a
//!   provider's physical projection
//! - A pluggable translation stage (in-memory and relational providers)
//! - Predicate optimizers for relational null semantics
//! - Shaper compilation into materializers, with optional change tracking
//! - A bounded compiled-query cache
//! - Sync and async execution with result-cardinality checks
//!
//! ## Key Invariants
//!
//! - Visitors rebuild only the nodes they change; untouched subtrees keep
//!   their identity
//! - Two projection members are equal iff their member chains are equal
//! - After projection binding, every value the shaper reads is a slot of
//!   the provider's projection
//! - Within one execution, a key materializes as at most one entity entry

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod compiler;
mod context;
mod error;
mod execution;
pub mod expression;
pub mod in_memory;
mod materializer;
pub mod pipeline;
pub mod projection;
mod query_expression;
mod queryable;
pub mod relational;
mod shaper;
pub mod translation;
pub mod visitor;

pub use cache::{CacheKey, CacheStats, CompiledQueryCache};
pub use compiler::{ShapedQueryCompiler, ShaperFn, VALUE_BUFFER_PARAMETER};
pub use context::QueryContext;
pub use error::{QueryError, QueryResult};
pub use execution::{CompiledQuery, QueryIterator, QueryPlan};
pub use expression::{
    BinaryOp, ConstantValue, ExprRef, ExprType, Expression, ExpressionPrinter, MemberIdentity,
    QueryMethod, UnaryOp,
};
pub use in_memory::{InMemoryQueryProvider, InMemoryStore};
pub use materializer::{
    DefaultEntityMaterializerSource, EntityMaterializerSource, MaterializationContext,
    Materialized,
};
pub use pipeline::{QueryCompiler, QueryProvider};
pub use projection::{ProjectionBindingExpression, ProjectionIndex, ProjectionMapping, ProjectionMember};
pub use query_expression::{OrderingExpression, QueryExpression, QueryExpressionKind};
pub use queryable::Queryable;
pub use relational::RelationalQueryProvider;
pub use shaper::{EntityShaperExpression, ResultCardinality, ShapedQueryExpression, ShaperKind};
