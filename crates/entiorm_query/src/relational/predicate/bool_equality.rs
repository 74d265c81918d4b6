//! Expansion of equality between boolean conditions.

use crate::expression::{BinaryOp, ExprRef, Expression, ExtensionExpression};
use crate::visitor::ExpressionVisitor;

/// Rewrites `a == b` and `a != b` over booleans when either side is a
/// condition rather than a plain value, since SQL cannot compare search
/// conditions directly.
///
/// - `a == b` becomes `(a && b) || (!a && !b)`
/// - `a != b` becomes `(a && !b) || (!a && b)`
#[derive(Debug, Default, Clone, Copy)]
pub struct BoolEqualityExpander;

impl BoolEqualityExpander {
    /// Expands a predicate.
    pub fn expand(expr: &ExprRef) -> ExprRef {
        BoolEqualityExpander.visit(expr)
    }
}

fn is_plain_value(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::Constant(_)
            | Expression::QueryParameter { .. }
            | Expression::Extension(ExtensionExpression::Column(_))
    )
}

impl ExpressionVisitor for BoolEqualityExpander {
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        let expr = self.visit_children(expr);
        let Expression::Binary { op, left, right } = expr.as_ref() else {
            return expr;
        };
        if !matches!(op, BinaryOp::Equal | BinaryOp::NotEqual)
            || !left.ty().is_bool()
            || !right.ty().is_bool()
            || (is_plain_value(left) && is_plain_value(right))
        {
            return expr;
        }
        let (a, b) = (left.clone(), right.clone());
        match op {
            BinaryOp::Equal => Expression::or_else(
                Expression::and_also(a.clone(), b.clone()),
                Expression::and_also(Expression::not(a), Expression::not(b)),
            ),
            _ => Expression::or_else(
                Expression::and_also(a.clone(), Expression::not(b.clone())),
                Expression::and_also(Expression::not(a), b),
            ),
        }
    }
}
