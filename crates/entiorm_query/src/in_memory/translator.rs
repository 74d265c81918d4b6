//! Operator translation for the in-memory provider.

use crate::error::{QueryError, QueryResult};
use crate::expression::{ExprRef, ExprType, Expression};
use crate::in_memory::InMemoryQueryExpression;
use crate::projection::{ExpressionTranslator, ProjectionBindingExpressionVisitor, ProjectionMember};
use crate::query_expression::{OrderingExpression, QueryExpressionKind};
use crate::shaper::{ResultCardinality, ShapedQueryExpression};
use crate::translation::{
    bind_expression, bind_row_count, join_shaper, key_parts, remap_lambda_body,
    QueryableMethodTranslatingVisitor,
};
use entiorm_core::ScalarType;

/// Binds selector leaves to row reads of an in-memory query.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryExpressionTranslator;

impl ExpressionTranslator for InMemoryExpressionTranslator {
    fn translate(&self, expr: &ExprRef, query: &QueryExpressionKind) -> QueryResult<ExprRef> {
        bind_expression(expr, query)
    }
}

/// Translates queryable operators into [`ServerQuery`](crate::in_memory::ServerQuery) nodes.
#[derive(Debug, Default)]
pub struct InMemoryQueryableMethodTranslatingVisitor;

fn in_memory(query: &mut QueryExpressionKind) -> QueryResult<&mut InMemoryQueryExpression> {
    match query {
        QueryExpressionKind::InMemory(q) => Ok(q),
        other => Err(QueryError::translation(
            other.to_string(),
            "in-memory translation over a foreign query expression",
        )),
    }
}

fn bind_lambda(lambda: &ExprRef, source: &ShapedQueryExpression) -> QueryResult<ExprRef> {
    let body = remap_lambda_body(lambda, &[source.shaper.clone()])?;
    bind_expression(&body, &source.query_expression)
}

fn bind_keys(selector: &ExprRef, source: &ShapedQueryExpression) -> QueryResult<Vec<ExprRef>> {
    let body = remap_lambda_body(selector, &[source.shaper.clone()])?;
    key_parts(&body)
        .iter()
        .map(|part| bind_expression(part, &source.query_expression))
        .collect()
}

impl QueryableMethodTranslatingVisitor for InMemoryQueryableMethodTranslatingVisitor {
    fn translate_where(
        &mut self,
        mut source: ShapedQueryExpression,
        predicate: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let predicate = bind_lambda(predicate, &source)?;
        in_memory(&mut source.query_expression)?.apply_predicate(predicate);
        Ok(source)
    }

    fn translate_select(
        &mut self,
        mut source: ShapedQueryExpression,
        selector: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let body = remap_lambda_body(selector, &[source.shaper.clone()])?;
        let shaper = ProjectionBindingExpressionVisitor::new(&InMemoryExpressionTranslator)
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
        let key = bind_lambda(key_selector, &source)?;
        in_memory(&mut source.query_expression)?
            .apply_ordering(OrderingExpression::new(key, ascending), append)?;
        Ok(source)
    }

    fn translate_skip(
        &mut self,
        mut source: ShapedQueryExpression,
        count: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let count = bind_row_count(count, &source.query_expression)?;
        in_memory(&mut source.query_expression)?.apply_skip(count);
        Ok(source)
    }

    fn translate_take(
        &mut self,
        mut source: ShapedQueryExpression,
        count: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression> {
        let count = bind_row_count(count, &source.query_expression)?;
        in_memory(&mut source.query_expression)?.apply_take(count);
        Ok(source)
    }

    fn translate_distinct(
        &mut self,
        mut source: ShapedQueryExpression,
    ) -> QueryResult<ShapedQueryExpression> {
        in_memory(&mut source.query_expression)?.apply_distinct();
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
        let outer_key = bind_keys(outer_key_selector, &outer)?;
        let inner_key = bind_keys(inner_key_selector, &inner)?;
        if outer_key.len() != inner_key.len() {
            return Err(QueryError::translation(
                inner_key_selector.to_string(),
                "join keys have different arity",
            ));
        }
        let shaper = join_shaper(&outer.shaper, &inner.shaper, left);
        let QueryExpressionKind::InMemory(inner_query) = inner.query_expression else {
            return Err(QueryError::translation(
                inner_key_selector.to_string(),
                "inner source is not an in-memory query",
            ));
        };
        in_memory(&mut outer.query_expression)?.add_join(inner_query, outer_key, inner_key, left);
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
        in_memory(&mut source.query_expression)?.apply_count();
        Ok(source.with_shaper(Expression::projection_binding(
            ProjectionMember::new(),
            ExprType::Scalar(ScalarType::Integer),
        )))
    }
}
