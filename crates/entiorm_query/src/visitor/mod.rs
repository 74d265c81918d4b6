//! Tree rewriting primitives.

mod negation;
mod replacing;

pub use negation::NegationOptimizer;
pub use replacing::ReplacingExpressionVisitor;

use crate::expression::{ExprRef, Expression, ExtensionExpression};
use crate::shaper::{EntityShaperExpression, ShapedQueryExpression};
use std::convert::Infallible;
use std::sync::Arc;

/// A rewriting pass over an expression tree.
///
/// The default implementation rebuilds each node from its visited children
/// and returns the original node when no child changed.
pub trait ExpressionVisitor {
    /// Visits a node.
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        self.visit_children(expr)
    }

    /// Visits the direct children of a node and rebuilds it if any changed.
    fn visit_children(&mut self, expr: &ExprRef) -> ExprRef {
        map_children(expr, |child| self.visit(child))
    }
}

/// Rebuilds `expr` with each direct child replaced by `f(child)`.
///
/// Returns `expr` itself (same `Arc`) when `f` returned every child unchanged.
pub fn try_map_children<E, F>(expr: &ExprRef, mut f: F) -> Result<ExprRef, E>
where
    F: FnMut(&ExprRef) -> Result<ExprRef, E>,
{
    let mut changed = false;
    let mut go = |child: &ExprRef| -> Result<ExprRef, E> {
        let new = f(child)?;
        if !Arc::ptr_eq(&new, child) {
            changed = true;
        }
        Ok(new)
    };

    let rebuilt = match expr.as_ref() {
        Expression::Constant(_)
        | Expression::Parameter { .. }
        | Expression::QueryParameter { .. } => return Ok(expr.clone()),
        Expression::Member {
            expression,
            member,
            ty,
        } => Expression::Member {
            expression: go(expression)?,
            member: member.clone(),
            ty: ty.clone(),
        },
        Expression::Unary { op, operand } => Expression::Unary {
            op: *op,
            operand: go(operand)?,
        },
        Expression::Binary { op, left, right } => Expression::Binary {
            op: *op,
            left: go(left)?,
            right: go(right)?,
        },
        Expression::Conditional {
            test,
            if_true,
            if_false,
        } => Expression::Conditional {
            test: go(test)?,
            if_true: go(if_true)?,
            if_false: go(if_false)?,
        },
        Expression::New {
            type_name,
            arguments,
        } => Expression::New {
            type_name: type_name.clone(),
            arguments: arguments
                .iter()
                .map(|(m, e)| Ok((m.clone(), go(e)?)))
                .collect::<Result<_, E>>()?,
        },
        Expression::MemberInit {
            type_name,
            bindings,
        } => Expression::MemberInit {
            type_name: type_name.clone(),
            bindings: bindings
                .iter()
                .map(|(m, e)| Ok((m.clone(), go(e)?)))
                .collect::<Result<_, E>>()?,
        },
        Expression::Lambda { parameters, body } => Expression::Lambda {
            parameters: parameters.clone(),
            body: go(body)?,
        },
        Expression::Call { method, arguments } => Expression::Call {
            method: method.clone(),
            arguments: arguments.iter().map(&mut go).collect::<Result<_, E>>()?,
        },
        Expression::ClientCall {
            name,
            arguments,
            ty,
        } => Expression::ClientCall {
            name: name.clone(),
            arguments: arguments.iter().map(&mut go).collect::<Result<_, E>>()?,
            ty: ty.clone(),
        },
        Expression::Extension(ext) => Expression::Extension(match ext {
            ExtensionExpression::ProjectionBinding(_)
            | ExtensionExpression::ValueBufferRead(_)
            | ExtensionExpression::Column(_) => return Ok(expr.clone()),
            ExtensionExpression::ShapedQuery(shaped) => {
                ExtensionExpression::ShapedQuery(ShapedQueryExpression {
                    shaper: go(&shaped.shaper)?,
                    ..shaped.clone()
                })
            }
            ExtensionExpression::EntityShaper(shaper) => {
                ExtensionExpression::EntityShaper(EntityShaperExpression {
                    value_buffer: go(&shaper.value_buffer)?,
                    ..shaper.clone()
                })
            }
            ExtensionExpression::EntityProjection(projection) => {
                let mut projection = projection.clone();
                projection.properties = projection
                    .properties
                    .iter()
                    .map(&mut go)
                    .collect::<Result<_, E>>()?;
                ExtensionExpression::EntityProjection(projection)
            }
            ExtensionExpression::In {
                operand,
                values,
                negated,
            } => ExtensionExpression::In {
                operand: go(operand)?,
                values: values.iter().map(&mut go).collect::<Result<_, E>>()?,
                negated: *negated,
            },
            ExtensionExpression::IsNull { operand, negated } => ExtensionExpression::IsNull {
                operand: go(operand)?,
                negated: *negated,
            },
            ExtensionExpression::SqlFunction {
                name,
                arguments,
                ty,
            } => ExtensionExpression::SqlFunction {
                name: name.clone(),
                arguments: arguments.iter().map(&mut go).collect::<Result<_, E>>()?,
                ty: *ty,
            },
        }),
    };

    Ok(if changed { Arc::new(rebuilt) } else { expr.clone() })
}

/// Infallible form of [`try_map_children`].
pub fn map_children<F>(expr: &ExprRef, mut f: F) -> ExprRef
where
    F: FnMut(&ExprRef) -> ExprRef,
{
    match try_map_children::<Infallible, _>(expr, |child| Ok(f(child))) {
        Ok(rebuilt) => rebuilt,
        Err(never) => match never {},
    }
}

/// Returns the direct children of a node, in visiting order.
pub fn children(expr: &Expression) -> Vec<&ExprRef> {
    match expr {
        Expression::Constant(_) | Expression::Parameter { .. } | Expression::QueryParameter { .. } => {
            Vec::new()
        }
        Expression::Member { expression, .. } => vec![expression],
        Expression::Unary { operand, .. } => vec![operand],
        Expression::Binary { left, right, .. } => vec![left, right],
        Expression::Conditional {
            test,
            if_true,
            if_false,
        } => vec![test, if_true, if_false],
        Expression::New { arguments, .. } => arguments.iter().map(|(_, e)| e).collect(),
        Expression::MemberInit { bindings, .. } => bindings.iter().map(|(_, e)| e).collect(),
        Expression::Lambda { body, .. } => vec![body],
        Expression::Call { arguments, .. } | Expression::ClientCall { arguments, .. } => {
            arguments.iter().collect()
        }
        Expression::Extension(ext) => match ext {
            ExtensionExpression::ProjectionBinding(_)
            | ExtensionExpression::ValueBufferRead(_)
            | ExtensionExpression::Column(_) => Vec::new(),
            ExtensionExpression::ShapedQuery(shaped) => vec![&shaped.shaper],
            ExtensionExpression::EntityShaper(shaper) => vec![&shaper.value_buffer],
            ExtensionExpression::EntityProjection(projection) => {
                projection.properties.iter().collect()
            }
            ExtensionExpression::In {
                operand, values, ..
            } => std::iter::once(operand).chain(values.iter()).collect(),
            ExtensionExpression::IsNull { operand, .. } => vec![operand],
            ExtensionExpression::SqlFunction { arguments, .. } => arguments.iter().collect(),
        },
    }
}

/// Calls `f` on every node of the tree, parents before children.
pub fn for_each_node(expr: &Expression, f: &mut dyn FnMut(&Expression)) {
    f(expr);
    for child in children(expr) {
        for_each_node(child, f);
    }
}
