//! Replacement by node identity.

use crate::expression::{ExprRef, Expression};
use crate::visitor::ExpressionVisitor;
use std::sync::Arc;

/// Substitutes nodes by identity and inlines member access on object
/// construction.
///
/// A node is replaced only when it is the very same `Arc` as one of the
/// originals. A member access whose receiver becomes a `New` or `MemberInit`
/// resolves directly to the argument initializing that member.
#[derive(Debug, Clone)]
pub struct ReplacingExpressionVisitor {
    originals: Vec<ExprRef>,
    replacements: Vec<ExprRef>,
}

impl ReplacingExpressionVisitor {
    /// Creates a visitor; `originals[i]` is replaced by `replacements[i]`.
    pub fn new(originals: Vec<ExprRef>, replacements: Vec<ExprRef>) -> Self {
        debug_assert_eq!(originals.len(), replacements.len());
        Self {
            originals,
            replacements,
        }
    }

    /// Replaces one node in `tree`.
    pub fn replace(original: &ExprRef, replacement: &ExprRef, tree: &ExprRef) -> ExprRef {
        Self::new(vec![original.clone()], vec![replacement.clone()]).visit(tree)
    }
}

impl ExpressionVisitor for ReplacingExpressionVisitor {
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        if let Some(i) = self.originals.iter().position(|o| Arc::ptr_eq(o, expr)) {
            return self.replacements[i].clone();
        }

        if let Expression::Member {
            expression,
            member,
            ty,
        } = expr.as_ref()
        {
            let receiver = self.visit(expression);
            let inlined = match receiver.as_ref() {
                Expression::New { arguments, .. } => arguments.iter().find(|(m, _)| m == member),
                Expression::MemberInit { bindings, .. } => bindings.iter().find(|(m, _)| m == member),
                _ => None,
            };
            if let Some((_, argument)) = inlined {
                return argument.clone();
            }
            if Arc::ptr_eq(&receiver, expression) {
                return expr.clone();
            }
            return Arc::new(Expression::Member {
                expression: receiver,
                member: member.clone(),
                ty: ty.clone(),
            });
        }

        self.visit_children(expr)
    }
}
