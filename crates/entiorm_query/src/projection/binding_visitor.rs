//! Binding of result selectors to projection members.

use crate::error::QueryResult;
use crate::expression::{ExprRef, ExprType, Expression, ExtensionExpression, MemberIdentity};
use crate::projection::{ProjectionMapping, ProjectionMember};
use crate::query_expression::{QueryExpression, QueryExpressionKind};
use crate::shaper::EntityShaperExpression;
use std::sync::Arc;

/// Converts a selector leaf into the provider's form over the current row.
pub trait ExpressionTranslator {
    /// Translates `expr`; fails with a translation error for constructs the
    /// provider cannot evaluate.
    fn translate(&self, expr: &ExprRef, query: &QueryExpressionKind) -> QueryResult<ExprRef>;
}

/// Assigns a projection member to every leaf of a selector.
///
/// Object construction is descended member by member, so the member paths
/// mirror the nesting of the result. Leaves are translated and recorded in a
/// fresh mapping; in the returned shaper they are replaced by projection
/// bindings. Entity shapers are re-bound to the member they now occupy.
#[derive(Clone, Copy)]
pub struct ProjectionBindingExpressionVisitor<'a> {
    translator: &'a dyn ExpressionTranslator,
}

struct BindingState {
    members: Vec<ProjectionMember>,
    mapping: ProjectionMapping,
}

impl<'a> ProjectionBindingExpressionVisitor<'a> {
    /// Creates a visitor that translates leaves with `translator`.
    pub fn new(translator: &'a dyn ExpressionTranslator) -> Self {
        Self { translator }
    }

    /// Binds `selector` against `query`, applies the resulting projection and
    /// returns the new shaper.
    ///
    /// `selector` must already have its lambda parameter replaced by the
    /// query's current shaper.
    pub fn translate(
        &self,
        query: &mut QueryExpressionKind,
        selector: &ExprRef,
    ) -> QueryResult<ExprRef> {
        let mut state = BindingState {
            members: vec![ProjectionMember::new()],
            mapping: ProjectionMapping::new(),
        };
        let shaper = self.visit(selector, query, &mut state)?;
        query.apply_projection(state.mapping);
        Ok(shaper)
    }

    fn visit(
        &self,
        expr: &ExprRef,
        query: &QueryExpressionKind,
        state: &mut BindingState,
    ) -> QueryResult<ExprRef> {
        let current = state.members.last().cloned().unwrap_or_default();
        match expr.as_ref() {
            Expression::New {
                type_name,
                arguments,
            } => Ok(Arc::new(Expression::New {
                type_name: type_name.clone(),
                arguments: self.visit_members(arguments, &current, query, state)?,
            })),
            Expression::MemberInit {
                type_name,
                bindings,
            } => Ok(Arc::new(Expression::MemberInit {
                type_name: type_name.clone(),
                bindings: self.visit_members(bindings, &current, query, state)?,
            })),
            Expression::Extension(ExtensionExpression::EntityShaper(shaper)) => {
                let projection = resolve_value_buffer(shaper, query)?;
                state.mapping.insert(current.clone(), projection);
                Ok(shaper
                    .with_value_buffer(Expression::projection_binding(current, ExprType::ValueBuffer))
                    .into_expression())
            }
            _ => {
                let translated = self.translator.translate(expr, query)?;
                let ty = match expr.ty() {
                    ExprType::Unknown => translated.ty(),
                    ty => ty,
                };
                state.mapping.insert(current.clone(), translated);
                Ok(Expression::projection_binding(current, ty))
            }
        }
    }

    fn visit_members(
        &self,
        members: &[(MemberIdentity, ExprRef)],
        current: &ProjectionMember,
        query: &QueryExpressionKind,
        state: &mut BindingState,
    ) -> QueryResult<Vec<(MemberIdentity, ExprRef)>> {
        let mut visited = Vec::with_capacity(members.len());
        for (member, argument) in members {
            state.members.push(current.add_member(member.clone()));
            let result = self.visit(argument, query, state);
            state.members.pop();
            visited.push((member.clone(), result?));
        }
        Ok(visited)
    }
}

/// Resolves an entity shaper's value-buffer binding through the query's
/// current projection mapping.
pub(crate) fn resolve_value_buffer(
    shaper: &EntityShaperExpression,
    query: &QueryExpressionKind,
) -> QueryResult<ExprRef> {
    match shaper.value_buffer.as_ref() {
        Expression::Extension(ExtensionExpression::ProjectionBinding(binding)) => {
            query.get_mapped_projection(binding.member())
        }
        _ => Ok(shaper.value_buffer.clone()),
    }
}
