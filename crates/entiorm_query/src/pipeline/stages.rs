//! Provider-independent pipeline stages.

use crate::expression::{ConstantValue, ExprRef, ExprType, Expression};
use crate::pipeline::QueryProvider;
use crate::projection::ProjectionMember;
use crate::shaper::{EntityShaperExpression, ShapedQueryExpression};
use crate::visitor::ExpressionVisitor;

/// Provider-independent query rewrites. Currently leaves the tree unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryOptimizingExpressionVisitor;

impl ExpressionVisitor for QueryOptimizingExpressionVisitor {}

/// Replaces every entity queryable root with a shaped query seeded by the
/// provider: a fresh query expression plus an entity shaper bound to its
/// root projection member.
pub struct EntityQueryableExpressionVisitor<'a> {
    provider: &'a dyn QueryProvider,
}

impl<'a> EntityQueryableExpressionVisitor<'a> {
    /// Creates the visitor for `provider`.
    pub fn new(provider: &'a dyn QueryProvider) -> Self {
        Self { provider }
    }
}

impl ExpressionVisitor for EntityQueryableExpressionVisitor<'_> {
    fn visit(&mut self, expr: &ExprRef) -> ExprRef {
        match expr.as_ref() {
            Expression::Constant(ConstantValue::EntityQueryable(entity_type)) => {
                let shaper = EntityShaperExpression::new(
                    entity_type.clone(),
                    Expression::projection_binding(ProjectionMember::new(), ExprType::ValueBuffer),
                    false,
                );
                ShapedQueryExpression::new(
                    self.provider.create_query_expression(entity_type),
                    shaper.into_expression(),
                )
                .into_expression()
            }
            _ => self.visit_children(expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::QueryMethod;
    use crate::in_memory::InMemoryQueryProvider;
    use entiorm_core::{EntityType, Property, ScalarType};
    use std::sync::Arc;

    #[test]
    fn roots_become_shaped_queries() {
        let et = EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).key())
            .build()
            .unwrap();
        let query = Expression::call(QueryMethod::Distinct, vec![Expression::entity_queryable(&et)]);
        let rooted = EntityQueryableExpressionVisitor::new(&InMemoryQueryProvider).visit(&query);

        let Expression::Call { arguments, .. } = rooted.as_ref() else {
            panic!("call expected");
        };
        let shaped = arguments[0].as_shaped_query().unwrap();
        assert_eq!(
            shaped.shaper.to_string(),
            "UnbufferedEntityShaper<Blog>(offset: 0, ProjectionBinding(EmptyProjectionMember))"
        );
    }

    #[test]
    fn optimizing_stage_keeps_tree_identity() {
        let tree = Expression::constant(1);
        let visited = QueryOptimizingExpressionVisitor.visit(&tree);
        assert!(Arc::ptr_eq(&tree, &visited));
    }
}
