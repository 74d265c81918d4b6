//! Predicate rewriting for SQL generation.

mod bool_equality;
mod in_optimizer;
mod null_semantics;

pub use bool_equality::BoolEqualityExpander;
pub use in_optimizer::InExpressionOptimizer;
pub use null_semantics::{is_nullable, NullSemanticsRewriter};

use crate::expression::ExprRef;
use crate::visitor::NegationOptimizer;

/// Runs the predicate rewrites in their fixed order:
///
/// 1. `IN` folding
/// 2. negation
/// 3. boolean equality expansion
/// 4. negation
/// 5. null semantics
/// 6. negation
///
/// Negation runs between the other passes because each of them can produce
/// `!` over nodes the next pass needs to see in normalized form.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositePredicateVisitor;

impl CompositePredicateVisitor {
    /// Rewrites a `WHERE` condition.
    pub fn optimize(predicate: &ExprRef) -> ExprRef {
        let predicate = InExpressionOptimizer::optimize(predicate);
        let predicate = NegationOptimizer::optimize(&predicate);
        let predicate = BoolEqualityExpander::expand(&predicate);
        let predicate = NegationOptimizer::optimize(&predicate);
        let predicate = NullSemanticsRewriter::rewrite_predicate(&predicate);
        NegationOptimizer::optimize(&predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ColumnExpression, Expression};
    use entiorm_core::{Property, ScalarType};

    #[test]
    fn negated_in_list_flips_to_not_in() {
        let id = ColumnExpression::for_property(&Property::new("Id", ScalarType::Integer), "b");
        let predicate = Expression::not(Expression::or_else(
            Expression::equal(id.clone(), Expression::constant(1)),
            Expression::equal(id, Expression::constant(2)),
        ));
        assert_eq!(
            CompositePredicateVisitor::optimize(&predicate).to_string(),
            "b.Id NOT IN (1, 2)"
        );
    }

    #[test]
    fn negated_nullable_equality_is_exact() {
        let name =
            ColumnExpression::for_property(&Property::new("Name", ScalarType::Text).nullable(), "b");
        let predicate = Expression::not(Expression::equal(name, Expression::constant("a")));
        assert_eq!(
            CompositePredicateVisitor::optimize(&predicate).to_string(),
            "((b.Name != \"a\") || b.Name IS NULL)"
        );
    }
}
