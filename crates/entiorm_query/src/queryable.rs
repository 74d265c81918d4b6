//! Fluent construction of operator call chains.

use crate::expression::{ExprRef, Expression, QueryMethod};
use entiorm_core::EntityType;
use std::fmt;
use std::sync::Arc;

/// A query under construction: a chain of [`Expression::Call`] nodes over
/// an entity queryable root.
///
/// Lambdas are ordinary [`Expression::lambda`] trees; terminal operators
/// (`first`, `count`, ...) also return a `Queryable` whose expression is
/// handed to the compiler.
#[derive(Debug, Clone)]
pub struct Queryable {
    expression: ExprRef,
}

impl Queryable {
    /// A query over every entity of `entity_type`.
    pub fn from_entity(entity_type: &Arc<EntityType>) -> Self {
        Self {
            expression: Expression::entity_queryable(entity_type),
        }
    }

    /// Returns the query tree.
    pub fn expression(&self) -> &ExprRef {
        &self.expression
    }

    /// Returns the query tree, consuming the builder.
    pub fn into_expression(self) -> ExprRef {
        self.expression
    }

    /// Applies any operator; `arguments` follow the source.
    #[must_use]
    pub fn call(self, method: QueryMethod, arguments: impl IntoIterator<Item = ExprRef>) -> Self {
        let arguments = std::iter::once(self.expression).chain(arguments).collect();
        Self {
            expression: Expression::call(method, arguments),
        }
    }

    /// `Where`
    #[must_use]
    pub fn filter(self, predicate: ExprRef) -> Self {
        self.call(QueryMethod::Where, [predicate])
    }

    /// `Select`
    #[must_use]
    pub fn select(self, selector: ExprRef) -> Self {
        self.call(QueryMethod::Select, [selector])
    }

    /// `OrderBy`
    #[must_use]
    pub fn order_by(self, key: ExprRef) -> Self {
        self.call(QueryMethod::OrderBy, [key])
    }

    /// `OrderByDescending`
    #[must_use]
    pub fn order_by_descending(self, key: ExprRef) -> Self {
        self.call(QueryMethod::OrderByDescending, [key])
    }

    /// `ThenBy`
    #[must_use]
    pub fn then_by(self, key: ExprRef) -> Self {
        self.call(QueryMethod::ThenBy, [key])
    }

    /// `ThenByDescending`
    #[must_use]
    pub fn then_by_descending(self, key: ExprRef) -> Self {
        self.call(QueryMethod::ThenByDescending, [key])
    }

    /// `Skip`
    #[must_use]
    pub fn skip(self, count: ExprRef) -> Self {
        self.call(QueryMethod::Skip, [count])
    }

    /// `Take`
    #[must_use]
    pub fn take(self, count: ExprRef) -> Self {
        self.call(QueryMethod::Take, [count])
    }

    /// `Distinct`
    #[must_use]
    pub fn distinct(self) -> Self {
        self.call(QueryMethod::Distinct, [])
    }

    /// `Join`, with an optional `(outer, inner) => result` selector.
    #[must_use]
    pub fn join(
        self,
        inner: Queryable,
        outer_key: ExprRef,
        inner_key: ExprRef,
        result_selector: Option<ExprRef>,
    ) -> Self {
        let arguments = [inner.expression, outer_key, inner_key]
            .into_iter()
            .chain(result_selector);
        self.call(QueryMethod::Join, arguments)
    }

    /// `LeftJoin`, with an optional `(outer, inner) => result` selector.
    #[must_use]
    pub fn left_join(
        self,
        inner: Queryable,
        outer_key: ExprRef,
        inner_key: ExprRef,
        result_selector: Option<ExprRef>,
    ) -> Self {
        let arguments = [inner.expression, outer_key, inner_key]
            .into_iter()
            .chain(result_selector);
        self.call(QueryMethod::LeftJoin, arguments)
    }

    /// `First`
    #[must_use]
    pub fn first(self) -> Self {
        self.call(QueryMethod::First, [])
    }

    /// `FirstOrDefault`
    #[must_use]
    pub fn first_or_default(self) -> Self {
        self.call(QueryMethod::FirstOrDefault, [])
    }

    /// `Single`
    #[must_use]
    pub fn single(self) -> Self {
        self.call(QueryMethod::Single, [])
    }

    /// `SingleOrDefault`
    #[must_use]
    pub fn single_or_default(self) -> Self {
        self.call(QueryMethod::SingleOrDefault, [])
    }

    /// `Count`
    #[must_use]
    pub fn count(self) -> Self {
        self.call(QueryMethod::Count, [])
    }

    /// `AsTracking`
    #[must_use]
    pub fn as_tracking(self) -> Self {
        self.call(QueryMethod::AsTracking, [])
    }

    /// `AsNoTracking`
    #[must_use]
    pub fn as_no_tracking(self) -> Self {
        self.call(QueryMethod::AsNoTracking, [])
    }
}

impl fmt::Display for Queryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::{Property, ScalarType};

    #[test]
    fn builds_call_chain_source_first() {
        let et = EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).key())
            .build()
            .unwrap();
        let query = Queryable::from_entity(&et)
            .take(Expression::constant(3))
            .count();
        let Expression::Call { method, arguments } = query.expression().as_ref() else {
            panic!("call expected");
        };
        assert_eq!(*method, QueryMethod::Count);
        let Expression::Call { method, arguments: inner } = arguments[0].as_ref() else {
            panic!("call expected");
        };
        assert_eq!(*method, QueryMethod::Take);
        assert_eq!(inner.len(), 2);
    }
}
