//! Negation normalization.

use crate::expression::{BinaryOp, ExprRef, Expression, ExtensionExpression, UnaryOp};
use crate::visitor::ExpressionVisitor;
use entiorm_core::Value;
use std::sync::Arc;

/// Pushes logical negation down to the leaves.
///
/// - `!!x` becomes `x`
/// - `!true` becomes `false`
/// - `!(a && b)` becomes `!a || !b`, `!(a || b)` becomes `!a && !b`
/// - `!(a == b)` becomes `a != b` (and likewise for the other comparisons)
/// - `!(x IS NULL)` and `!(x IN (..))` flip their negation flag
///
/// The result never contains a `!` over a node it could have rewritten, so
/// running the optimizer on its own output changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegationOptimizer;

impl NegationOptimizer {
    /// Optimizes a tree.
    pub fn optimize(expr: &ExprRef) -> ExprRef {
        NegationOptimizer.visit(expr)
    }

    fn negate(&mut self, operand: &ExprRef) -> ExprRef {
        match operand.as_ref() {
            Expression::Unary {
                op: UnaryOp::Not,
                operand: inner,
            } => self.visit(inner),
            Expression::Constant(_) => match operand.as_constant() {
                Some(Value::Bool(b)) => Expression::constant(!*b),
                _ => Expression::not(operand.clone()),
            },
            Expression::Binary { op, left, right } => match op {
                BinaryOp::AndAlso => Expression::or_else(
                    self.negate(left),
                    self.negate(right),
                ),
                BinaryOp::OrElse => Expression::and_also(
                    self.negate(left),
                    self.negate(right),
                ),
                _ => match op.negate_comparison() {
                    Some(negated) => Expression::binary(negated, self.visit(left), self.visit(right)),
                    None => Expression::not(self.visit(operand)),
                },
            },
            Expression::Extension(ExtensionExpression::IsNull {
                operand: inner,
                negated,
            }) => Expression::extension(ExtensionExpression::IsNull {
                operand: self.visit(inner),
                negated: !negated,
            }),
            Expression::Extension(ExtensionExpression::In {
                operand: inner,
                values,
                negated,
            }) => Expression::extension(ExtensionExpression::In {
                operand: self.visit(inner),
                values: values.iter().map(|v| self.visit(v)).collect(),
                negated: !negated,
            }),
            _ => {
                let visited = self.visit(operand);
                Expression::not(visited)
            }
        }
    }
}

impl ExpressionVisitor for NegationOptimizer {
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        if let Expression::Unary {
            op: UnaryOp::Not,
            operand,
        } = expr.as_ref()
        {
            let negated = self.negate(operand);
            // Keep the original node when nothing could be pushed through.
            if let Expression::Unary {
                op: UnaryOp::Not,
                operand: new_operand,
            } = negated.as_ref()
            {
                if Arc::ptr_eq(new_operand, operand) {
                    return expr.clone();
                }
            }
            return negated;
        }
        self.visit_children(expr)
    }
}
