//! Folding of equality chains into `IN` lists.

use crate::expression::{BinaryOp, ExprRef, Expression, ExtensionExpression};
use crate::visitor::ExpressionVisitor;

/// Rewrites `c = a OR c = b` into `c IN (a, b)` and `c <> a AND c <> b`
/// into `c NOT IN (a, b)`.
///
/// Only columns compared with non-null constants or parameters are folded;
/// existing `IN` lists on the same column absorb further candidates.
#[derive(Debug, Default, Clone, Copy)]
pub struct InExpressionOptimizer;

impl InExpressionOptimizer {
    /// Optimizes a predicate.
    pub fn optimize(expr: &ExprRef) -> ExprRef {
        InExpressionOptimizer.visit(expr)
    }
}

struct Candidate {
    column: ExprRef,
    values: Vec<ExprRef>,
}

fn is_candidate_value(expr: &Expression) -> bool {
    match expr {
        Expression::Constant(_) => expr.as_constant().is_some_and(|v| !v.is_null()),
        Expression::QueryParameter { .. } => true,
        _ => false,
    }
}

fn is_column(expr: &Expression) -> bool {
    matches!(expr, Expression::Extension(ExtensionExpression::Column(_)))
}

/// Returns the column and candidate values of a term that can join an
/// `IN` (`negated == false`) or `NOT IN` (`negated == true`) list.
fn as_candidate(term: &ExprRef, negated: bool) -> Option<Candidate> {
    let wanted = if negated {
        BinaryOp::NotEqual
    } else {
        BinaryOp::Equal
    };
    match term.as_ref() {
        Expression::Binary { op, left, right } if *op == wanted => {
            if is_column(left) && is_candidate_value(right) {
                Some(Candidate {
                    column: left.clone(),
                    values: vec![right.clone()],
                })
            } else if is_column(right) && is_candidate_value(left) {
                Some(Candidate {
                    column: right.clone(),
                    values: vec![left.clone()],
                })
            } else {
                None
            }
        }
        Expression::Extension(ExtensionExpression::In {
            operand,
            values,
            negated: n,
        }) if *n == negated && is_column(operand) => Some(Candidate {
            column: operand.clone(),
            values: values.clone(),
        }),
        _ => None,
    }
}

fn flatten(expr: &ExprRef, op: BinaryOp, out: &mut Vec<ExprRef>) {
    match expr.as_ref() {
        Expression::Binary {
            op: inner,
            left,
            right,
        } if *inner == op => {
            flatten(left, op, out);
            flatten(right, op, out);
        }
        _ => out.push(expr.clone()),
    }
}

fn fold(expr: &ExprRef, op: BinaryOp, negated: bool) -> ExprRef {
    let mut terms = Vec::new();
    flatten(expr, op, &mut terms);

    // Each output slot is either an untouched term or a growing candidate.
    let mut slots: Vec<Result<Candidate, ExprRef>> = Vec::new();
    let mut merged = false;
    for term in terms {
        match as_candidate(&term, negated) {
            Some(candidate) => {
                let existing = slots.iter_mut().find_map(|slot| match slot {
                    Ok(c) if c.column == candidate.column => Some(c),
                    _ => None,
                });
                match existing {
                    Some(c) => {
                        merged = true;
                        for value in candidate.values {
                            if !c.values.contains(&value) {
                                c.values.push(value);
                            }
                        }
                    }
                    None => slots.push(Ok(candidate)),
                }
            }
            None => slots.push(Err(term)),
        }
    }
    if !merged {
        return expr.clone();
    }

    let rebuilt = slots.into_iter().map(|slot| match slot {
        Ok(Candidate { column, mut values }) if values.len() == 1 => {
            let value = values.remove(0);
            Expression::binary(
                if negated {
                    BinaryOp::NotEqual
                } else {
                    BinaryOp::Equal
                },
                column,
                value,
            )
        }
        Ok(c) => Expression::extension(ExtensionExpression::In {
            operand: c.column,
            values: c.values,
            negated,
        }),
        Err(term) => term,
    });
    rebuilt
        .reduce(|acc, term| Expression::binary(op, acc, term))
        .unwrap_or_else(|| expr.clone())
}

impl ExpressionVisitor for InExpressionOptimizer {
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        let expr = self.visit_children(expr);
        match expr.as_ref() {
            Expression::Binary {
                op: BinaryOp::OrElse,
                ..
            } => fold(&expr, BinaryOp::OrElse, false),
            Expression::Binary {
                op: BinaryOp::AndAlso,
                ..
            } => fold(&expr, BinaryOp::AndAlso, true),
            _ => expr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ColumnExpression;
    use entiorm_core::{Property, ScalarType};

    fn column(name: &str) -> ExprRef {
        ColumnExpression::for_property(&Property::new(name, ScalarType::Integer), "b")
    }

    #[test]
    fn or_chain_on_one_column_becomes_in() {
        let c = column("Id");
        let predicate = Expression::or_else(
            Expression::or_else(
                Expression::equal(c.clone(), Expression::constant(1)),
                Expression::equal(c.clone(), Expression::constant(2)),
            ),
            Expression::equal(Expression::constant(3), c),
        );
        assert_eq!(
            InExpressionOptimizer::optimize(&predicate).to_string(),
            "b.Id IN (1, 2, 3)"
        );
    }

    #[test]
    fn and_chain_of_inequalities_becomes_not_in() {
        let c = column("Id");
        let other = Expression::equal(column("Rank"), Expression::constant(9));
        let predicate = Expression::and_also(
            Expression::and_also(
                Expression::not_equal(c.clone(), Expression::constant(1)),
                other,
            ),
            Expression::not_equal(c, Expression::constant(2)),
        );
        assert_eq!(
            InExpressionOptimizer::optimize(&predicate).to_string(),
            "(b.Id NOT IN (1, 2) && (b.Rank == 9))"
        );
    }

    #[test]
    fn null_constants_are_not_folded() {
        let c = column("Id");
        let predicate = Expression::or_else(
            Expression::equal(c.clone(), Expression::constant(1)),
            Expression::equal(c, Expression::constant(entiorm_core::Value::Null)),
        );
        let optimized = InExpressionOptimizer::optimize(&predicate);
        assert!(std::sync::Arc::ptr_eq(&optimized, &predicate));
    }
}
