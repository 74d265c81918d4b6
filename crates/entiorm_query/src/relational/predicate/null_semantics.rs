//! Rewriting of equality so SQL three-valued logic matches client results.

use crate::expression::{BinaryOp, ExprRef, Expression, ExtensionExpression, UnaryOp};
use crate::visitor::{for_each_node, ExpressionVisitor};

/// Expands `==` and `!=` over nullable operands so that null compares equal
/// to null, as it does on the client.
///
/// The optimized form is exact only where a null result is treated like
/// false, which holds at the top of a `WHERE` condition and under `&&`/`||`
/// but not under `!`. The full form is exact everywhere.
#[derive(Debug, Clone, Copy)]
pub struct NullSemanticsRewriter {
    optimized: bool,
}

/// Whether an expression can evaluate to null in SQL.
pub fn is_nullable(expr: &Expression) -> bool {
    match expr {
        Expression::Constant(_) => expr.is_null_constant(),
        Expression::QueryParameter { .. } => true,
        Expression::Extension(ExtensionExpression::Column(column)) => column.nullable,
        Expression::Extension(ExtensionExpression::IsNull { .. })
        | Expression::Extension(ExtensionExpression::SqlFunction { .. }) => false,
        Expression::Unary { operand, .. } => is_nullable(operand),
        Expression::Binary { left, right, .. } => is_nullable(left) || is_nullable(right),
        Expression::Conditional {
            if_true, if_false, ..
        } => is_nullable(if_true) || is_nullable(if_false),
        Expression::Extension(ExtensionExpression::In {
            operand, values, ..
        }) => is_nullable(operand) || values.iter().any(|v| is_nullable(v)),
        _ => true,
    }
}

fn is_null(operand: ExprRef, negated: bool) -> ExprRef {
    Expression::extension(ExtensionExpression::IsNull { operand, negated })
}

fn and_all(terms: Vec<ExprRef>) -> ExprRef {
    terms
        .into_iter()
        .reduce(Expression::and_also)
        .unwrap_or_else(|| Expression::constant(true))
}

fn or_all(terms: Vec<ExprRef>) -> ExprRef {
    terms
        .into_iter()
        .reduce(Expression::or_else)
        .unwrap_or_else(|| Expression::constant(false))
}

/// True when a `!` wraps an equality with a nullable operand, which the
/// optimized form would get wrong.
fn negates_nullable_comparison(expr: &Expression) -> bool {
    let mut found = false;
    for_each_node(expr, &mut |node| {
        if let Expression::Unary {
            op: UnaryOp::Not,
            operand,
        } = node
        {
            for_each_node(operand, &mut |inner| {
                if let Expression::Binary {
                    op: BinaryOp::Equal | BinaryOp::NotEqual,
                    left,
                    right,
                } = inner
                {
                    if is_nullable(left) || is_nullable(right) {
                        found = true;
                    }
                }
            });
        }
    });
    found
}

impl NullSemanticsRewriter {
    /// Creates a rewriter producing the optimized or the full form.
    pub fn new(optimized: bool) -> Self {
        Self { optimized }
    }

    /// Rewrites a `WHERE` condition, choosing the form automatically: the
    /// optimized form unless the condition references query parameters or
    /// negates a nullable comparison.
    pub fn rewrite_predicate(predicate: &ExprRef) -> ExprRef {
        let optimized =
            !predicate.contains_query_parameter() && !negates_nullable_comparison(predicate);
        Self::new(optimized).visit(predicate)
    }

    fn rewrite_equality(&self, op: BinaryOp, a: &ExprRef, b: &ExprRef) -> Option<ExprRef> {
        let equal = op == BinaryOp::Equal;
        match (a.is_null_constant(), b.is_null_constant()) {
            (true, true) => return Some(Expression::constant(equal)),
            (true, false) => return Some(is_null(b.clone(), !equal)),
            (false, true) => return Some(is_null(a.clone(), !equal)),
            (false, false) => {}
        }

        let (a_nullable, b_nullable) = (is_nullable(a), is_nullable(b));
        if !a_nullable && !b_nullable {
            return None;
        }
        let compare = Expression::binary(op, a.clone(), b.clone());
        let null = |e: &ExprRef| is_null(e.clone(), false);
        let not_null = |e: &ExprRef| is_null(e.clone(), true);

        Some(match (a_nullable && b_nullable, equal, self.optimized) {
            // a = b OR (a IS NULL AND b IS NULL)
            (true, true, true) => {
                Expression::or_else(compare, Expression::and_also(null(a), null(b)))
            }
            // (a = b AND a IS NOT NULL AND b IS NOT NULL) OR (a IS NULL AND b IS NULL)
            (true, true, false) => Expression::or_else(
                and_all(vec![compare, not_null(a), not_null(b)]),
                Expression::and_also(null(a), null(b)),
            ),
            // (a <> b OR a IS NULL OR b IS NULL) AND (a IS NOT NULL OR b IS NOT NULL)
            (true, false, true) => Expression::and_also(
                or_all(vec![compare, null(a), null(b)]),
                Expression::or_else(not_null(a), not_null(b)),
            ),
            // (a <> b AND a IS NOT NULL AND b IS NOT NULL)
            //   OR (a IS NULL AND b IS NOT NULL) OR (a IS NOT NULL AND b IS NULL)
            (true, false, false) => or_all(vec![
                and_all(vec![compare, not_null(a), not_null(b)]),
                Expression::and_also(null(a), not_null(b)),
                Expression::and_also(not_null(a), null(b)),
            ]),
            (false, true, true) => compare,
            (false, true, false) => {
                let nullable = if a_nullable { a } else { b };
                Expression::and_also(compare, not_null(nullable))
            }
            (false, false, _) => {
                let nullable = if a_nullable { a } else { b };
                Expression::or_else(compare, null(nullable))
            }
        })
    }
}

impl ExpressionVisitor for NullSemanticsRewriter {
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        let expr = self.visit_children(expr);
        match expr.as_ref() {
            Expression::Binary {
                op: op @ (BinaryOp::Equal | BinaryOp::NotEqual),
                left,
                right,
            } => self.rewrite_equality(*op, left, right).unwrap_or(expr),
            _ => expr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ColumnExpression;
    use entiorm_core::{Property, ScalarType, Value};

    fn nullable(name: &str) -> ExprRef {
        ColumnExpression::for_property(&Property::new(name, ScalarType::Text).nullable(), "b")
    }

    fn required(name: &str) -> ExprRef {
        ColumnExpression::for_property(&Property::new(name, ScalarType::Text), "b")
    }

    #[test]
    fn both_nullable_equality_optimized() {
        let predicate = Expression::equal(nullable("A"), nullable("B"));
        assert_eq!(
            NullSemanticsRewriter::rewrite_predicate(&predicate).to_string(),
            "((b.A == b.B) || (b.A IS NULL && b.B IS NULL))"
        );
    }

    #[test]
    fn negated_comparison_uses_full_form() {
        let predicate = Expression::not(Expression::equal(nullable("A"), required("B")));
        assert_eq!(
            NullSemanticsRewriter::rewrite_predicate(&predicate).to_string(),
            "!((b.A == b.B) && b.A IS NOT NULL)"
        );
    }

    #[test]
    fn one_nullable_inequality() {
        let predicate = Expression::not_equal(nullable("A"), required("B"));
        assert_eq!(
            NullSemanticsRewriter::rewrite_predicate(&predicate).to_string(),
            "((b.A != b.B) || b.A IS NULL)"
        );
    }

    #[test]
    fn parameters_force_full_form() {
        let predicate = Expression::equal(
            required("A"),
            Expression::query_parameter("name", ScalarType::Text),
        );
        assert_eq!(
            NullSemanticsRewriter::rewrite_predicate(&predicate).to_string(),
            "((b.A == @name) && @name IS NOT NULL)"
        );
    }

    #[test]
    fn null_constant_becomes_is_null() {
        let predicate = Expression::not_equal(
            nullable("A"),
            Expression::constant(Value::Null),
        );
        assert_eq!(
            NullSemanticsRewriter::rewrite_predicate(&predicate).to_string(),
            "b.A IS NOT NULL"
        );
    }

    #[test]
    fn non_nullable_comparison_is_unchanged() {
        let predicate = Expression::equal(required("A"), Expression::constant("x"));
        let rewritten = NullSemanticsRewriter::rewrite_predicate(&predicate);
        assert!(std::sync::Arc::ptr_eq(&rewritten, &predicate));
    }
}
