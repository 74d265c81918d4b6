//! Projection algebra.
//!
//! A [`ProjectionMember`] names one leaf of a query's result shape. The shaper
//! refers to leaves through [`ProjectionBindingExpression`] placeholders; the
//! owning query expression maps each member to where its value lives
//! ([`ProjectionMapping`]) and, once the row layout is fixed, to a position in
//! the physical row ([`ProjectionIndex`]).

mod binding;
mod binding_visitor;
mod member;

pub use binding::{ProjectionBindingExpression, ProjectionIndex, ProjectionMapping};
pub use binding_visitor::{ExpressionTranslator, ProjectionBindingExpressionVisitor};
pub use member::ProjectionMember;
pub(crate) use binding_visitor::resolve_value_buffer;
