//! Operator translation for the relational provider.

use crate::error::{QueryError, QueryResult};
use crate::expression::{ExprRef, ExprType, Expression};
use crate::projection::{ExpressionTranslator, ProjectionBindingExpressionVisitor, ProjectionMember};
use crate::query_expression::{OrderingExpression, QueryExpressionKind};
use crate::relational::SelectExpression;
use crate::shaper::{ResultCardinality, ShapedQueryExpression};
use crate::translation::{
    bind_expression, bind_row_count, join_shaper, key_parts, remap_lambda_body,
    QueryableMethodTranslatingVisitor,
};
use entiorm_core::ScalarType;

/// Translates selector leaves into SQL expressions over a select's tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationalExpressionTranslator;

impl ExpressionTranslator for RelationalExpressionTranslator {
    fn translate(&self, expr: &ExprRef, query: &QueryExpressionKind) -> QueryResult<ExprRef> {
        bind_expression(expr, query)
    }
}

/// Translates queryable operators into clauses of a [`SelectExpression`].
#[derive(Debug, Default)]
pub struct RelationalQueryableMethodTranslatingVisitor;

fn select(query: &mut QueryExpressionKind) -> QueryResult<&mut SelectExpression> {
    match query {
        QueryExpressionKind::Select(select) => Ok(select),
        other => Err(QueryError::translation(
            other.to_string(),
            "relational translation over a foreign query expression",
        )),
    }
}

fn translate_lambda(lambda: &ExprRef, source: &ShapedQueryExpression) -> QueryResult<ExprRef> {
    let body = remap_lambda_body(lambda, &[source.shaper.clone()])?;
    RelationalExpressionTranslator.translate(&body, &source.query_expression)
}

impl QueryableMethodTranslatingVisitor for RelationalQueryableMethodTranslatingVisitor {
    fn translate_where(
        &mut self,
        mut source: ShapedQueryExpression,
        predicate: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let predicate = translate_lambda(predicate, &source)?;
        select(&mut source.query_expression)?.apply_predicate(predicate)?;
        Ok(source)
    }

    fn translate_select(
        &mut self,
        mut source: ShapedQueryExpression,
        selector: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let body = remap_lambda_body(selector, &[source.shaper.clone()])?;
        let shaper = ProjectionBindingExpressionVisitor::new(&RelationalExpressionTranslator)
            .translate(&mut source.query_expression, &body)?;
        Ok(source.with_shaper(shaper))
    }

    fn translate_order_by(
        &mut self,
        mut source: ShapedQueryExpression,
        key_selector: &ExprRef,
        ascending: bool,
        append: bool,
    ) -> QueryResult<ShapedQueryExpression> {
        let key = translate_lambda(key_selector, &source)?;
        select(&mut source.query_expression)?
            .apply_ordering(OrderingExpression::new(key, ascending), append)?;
        Ok(source)
    }

    fn translate_skip(
        &mut self,
        mut source: ShapedQueryExpression,
        count: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let count = bind_row_count(count, &source.query_expression)?;
        select(&mut source.query_expression)?.apply_offset(count)?;
        Ok(source)
    }

    fn translate_take(
        &mut self,
        mut source: ShapedQueryExpression,
        count: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let count = bind_row_count(count, &source.query_expression)?;
        select(&mut source.query_expression)?.apply_limit(count)?;
        Ok(source)
    }

    fn translate_distinct(
        &mut self,
        mut source: ShapedQueryExpression,
    ) -> QueryResult<ShapedQueryExpression> {
        select(&mut source.query_expression)?.apply_distinct()?;
        Ok(source)
    }

    fn translate_join(
        &mut self,
        mut outer: ShapedQueryExpression,
        inner: ShapedQueryExpression,
        outer_key_selector: &ExprRef,
        inner_key_selector: &ExprRef,
        left: bool,
    ) -> QueryResult<ShapedQueryExpression> {
        let outer_body = remap_lambda_body(outer_key_selector, &[outer.shaper.clone()])?;
        let inner_body = remap_lambda_body(inner_key_selector, &[inner.shaper.clone()])?;
        let outer_key = key_parts(&outer_body)
            .iter()
            .map(|part| RelationalExpressionTranslator.translate(part, &outer.query_expression))
            .collect::<QueryResult<Vec<_>>>()?;
        let inner_key = key_parts(&inner_body)
            .iter()
            .map(|part| RelationalExpressionTranslator.translate(part, &inner.query_expression))
            .collect::<QueryResult<Vec<_>>>()?;
        if outer_key.len() != inner_key.len() {
            return Err(QueryError::translation(
                inner_key_selector.to_string(),
                "join keys have different arity",
            ));
        }

        let shaper = join_shaper(&outer.shaper, &inner.shaper, left);
        let QueryExpressionKind::Select(inner_select) = inner.query_expression else {
            return Err(QueryError::translation(
                inner_key_selector.to_string(),
                "inner source is not a relational query",
            ));
        };
        select(&mut outer.query_expression)?.add_join(inner_select, outer_key, inner_key, left)?;
        Ok(ShapedQueryExpression {
            query_expression: outer.query_expression,
            shaper,
            cardinality: ResultCardinality::Enumerable,
            tracking: outer.tracking.or(inner.tracking),
        })
    }

    fn translate_count(
        &mut self,
        mut source: ShapedQueryExpression,
    ) -> QueryResult<ShapedQueryExpression> {
        select(&mut source.query_expression)?.apply_count()?;
        Ok(source.with_shaper(Expression::projection_binding(
            ProjectionMember::new(),
            ExprType::Scalar(ScalarType::Integer),
        )))
    }
}
