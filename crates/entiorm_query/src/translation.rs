//! Translation of queryable operator chains into shaped queries.

use crate::error::{QueryError, QueryResult};
use crate::expression::{
    ConstantValue, ExprRef, ExprType, Expression, ExtensionExpression, MemberIdentity,
    QueryMethod, TRANSPARENT_IDENTIFIER,
};
use crate::projection::resolve_value_buffer;
use crate::query_expression::{QueryExpression, QueryExpressionKind};
use crate::shaper::{ResultCardinality, ShapedQueryExpression};
use crate::visitor::{map_children, try_map_children, ExpressionVisitor, ReplacingExpressionVisitor};
use entiorm_core::{ScalarType, Value};
use std::sync::Arc;

/// Translates operator calls over shaped queries, one method per operator.
///
/// Providers implement the per-operator methods; the provided
/// [`translate`](Self::translate) walks the call chain from the innermost
/// source outwards. Lambda arguments are passed untouched: implementations
/// call [`remap_lambda_body`] with the source's shaper before translating.
pub trait QueryableMethodTranslatingVisitor {
    /// `Where(source, x => predicate)`
    fn translate_where(
        &mut self,
        source: ShapedQueryExpression,
        predicate: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `Select(source, x => selector)`
    fn translate_select(
        &mut self,
        source: ShapedQueryExpression,
        selector: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `OrderBy`/`ThenBy` and their descending forms. `append` is set for
    /// `ThenBy`.
    fn translate_order_by(
        &mut self,
        source: ShapedQueryExpression,
        key_selector: &ExprRef,
        ascending: bool,
        append: bool,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `Skip(source, count)`
    fn translate_skip(
        &mut self,
        source: ShapedQueryExpression,
        count: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `Take(source, count)`
    fn translate_take(
        &mut self,
        source: ShapedQueryExpression,
        count: &ExprRef,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `Distinct(source)`
    fn translate_distinct(
        &mut self,
        source: ShapedQueryExpression,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `Join`/`LeftJoin` on equal keys. The result's shaper is a transparent
    /// identifier holding both sides; see [`join_shaper`].
    fn translate_join(
        &mut self,
        outer: ShapedQueryExpression,
        inner: ShapedQueryExpression,
        outer_key_selector: &ExprRef,
        inner_key_selector: &ExprRef,
        left: bool,
    ) -> QueryResult<ShapedQueryExpression>;

    /// `Count(source)`
    fn translate_count(
        &mut self,
        source: ShapedQueryExpression,
    ) -> QueryResult<ShapedQueryExpression>;

    /// Translates a whole operator chain whose roots have already been
    /// replaced by shaped queries.
    fn translate(&mut self, expr: &ExprRef) -> QueryResult<ShapedQueryExpression> {
        if let Some(shaped) = expr.as_shaped_query() {
            return Ok(shaped.clone());
        }
        let Expression::Call { method, arguments } = expr.as_ref() else {
            return Err(QueryError::translation(
                expr.to_string(),
                "expression is not a query",
            ));
        };
        let argument = |i: usize| {
            arguments.get(i).ok_or_else(|| {
                QueryError::translation(expr.to_string(), format!("missing argument {i}"))
            })
        };

        let source = self.translate(argument(0)?)?;
        if source.cardinality != ResultCardinality::Enumerable {
            return Err(QueryError::translation(
                expr.to_string(),
                "operator applied to a single result",
            ));
        }
        tracing::trace!(method = method.name(), "translating query operator");

        match method {
            QueryMethod::Where => self.translate_where(source, argument(1)?),
            QueryMethod::Select => self.translate_select(source, argument(1)?),
            QueryMethod::OrderBy => self.translate_order_by(source, argument(1)?, true, false),
            QueryMethod::OrderByDescending => {
                self.translate_order_by(source, argument(1)?, false, false)
            }
            QueryMethod::ThenBy => self.translate_order_by(source, argument(1)?, true, true),
            QueryMethod::ThenByDescending => {
                self.translate_order_by(source, argument(1)?, false, true)
            }
            QueryMethod::Skip => self.translate_skip(source, argument(1)?),
            QueryMethod::Take => self.translate_take(source, argument(1)?),
            QueryMethod::Distinct => self.translate_distinct(source),
            QueryMethod::Join | QueryMethod::LeftJoin => {
                let inner = self.translate(argument(1)?)?;
                if inner.cardinality != ResultCardinality::Enumerable {
                    return Err(QueryError::translation(
                        argument(1)?.to_string(),
                        "joined source must be a sequence, not a single result",
                    ));
                }
                let joined = self.translate_join(
                    source,
                    inner,
                    argument(2)?,
                    argument(3)?,
                    *method == QueryMethod::LeftJoin,
                )?;
                match arguments.get(4) {
                    Some(result_selector) => {
                        let selector = transparent_selector(result_selector)?;
                        self.translate_select(joined, &selector)
                    }
                    None => Ok(joined),
                }
            }
            QueryMethod::First
            | QueryMethod::FirstOrDefault
            | QueryMethod::Single
            | QueryMethod::SingleOrDefault => {
                self.translate_first_or_single(source, method, arguments.get(1))
            }
            QueryMethod::Count => {
                let source = match arguments.get(1) {
                    Some(predicate) => self.translate_where(source, predicate)?,
                    None => source,
                };
                let mut counted = self.translate_count(source)?;
                counted.cardinality = ResultCardinality::Single;
                Ok(counted)
            }
            QueryMethod::AsTracking => Ok(ShapedQueryExpression {
                tracking: Some(true),
                ..source
            }),
            QueryMethod::AsNoTracking => Ok(ShapedQueryExpression {
                tracking: Some(false),
                ..source
            }),
            QueryMethod::Other(name) => Err(QueryError::translation(
                expr.to_string(),
                format!("operator '{name}' is not supported"),
            )),
        }
    }

    /// `First`, `FirstOrDefault`, `Single` and `SingleOrDefault`, with an
    /// optional predicate.
    ///
    /// `First*` limits to one row; `Single*` limits to two so that a second
    /// match can be detected.
    fn translate_first_or_single(
        &mut self,
        source: ShapedQueryExpression,
        method: &QueryMethod,
        predicate: Option<&ExprRef>,
    ) -> QueryResult<ShapedQueryExpression> {
        let source = match predicate {
            Some(predicate) => self.translate_where(source, predicate)?,
            None => source,
        };
        let (limit, cardinality) = match method {
            QueryMethod::First => (1, ResultCardinality::Single),
            QueryMethod::FirstOrDefault => (1, ResultCardinality::SingleOrDefault),
            QueryMethod::Single => (2, ResultCardinality::Single),
            _ => (2, ResultCardinality::SingleOrDefault),
        };
        let mut limited = self.translate_take(source, &Expression::constant(limit))?;
        limited.cardinality = cardinality;
        Ok(limited)
    }
}

/// Returns the body of `lambda` with its parameters replaced by
/// `replacements`, in order.
pub fn remap_lambda_body(lambda: &ExprRef, replacements: &[ExprRef]) -> QueryResult<ExprRef> {
    let (parameters, body) = lambda
        .as_lambda()
        .ok_or_else(|| QueryError::translation(lambda.to_string(), "expected a lambda"))?;
    if parameters.len() != replacements.len() {
        return Err(QueryError::translation(
            lambda.to_string(),
            format!(
                "expected {} lambda parameters, found {}",
                replacements.len(),
                parameters.len()
            ),
        ));
    }
    Ok(ReplacingExpressionVisitor::new(parameters.to_vec(), replacements.to_vec()).visit(body))
}

/// Builds the shaper of a join: a transparent identifier whose `Outer` and
/// `Inner` members are the two source shapers, re-bound under those members.
///
/// Entity shapers on both sides become buffered; for a left join the inner
/// ones also become nullable.
pub fn join_shaper(outer: &ExprRef, inner: &ExprRef, left: bool) -> ExprRef {
    Arc::new(Expression::New {
        type_name: TRANSPARENT_IDENTIFIER.to_string(),
        arguments: vec![
            (
                MemberIdentity::outer(),
                rebase_shaper(outer, &MemberIdentity::outer(), false),
            ),
            (
                MemberIdentity::inner(),
                rebase_shaper(inner, &MemberIdentity::inner(), left),
            ),
        ],
    })
}

fn rebase_shaper(shaper: &ExprRef, member: &MemberIdentity, nullable: bool) -> ExprRef {
    match shaper.as_ref() {
        Expression::Extension(ExtensionExpression::ProjectionBinding(binding)) => {
            Expression::projection_binding(binding.member().prepend(member.clone()), binding.ty().clone())
        }
        Expression::Extension(ExtensionExpression::EntityShaper(entity)) => {
            let mut rebased = entity
                .with_value_buffer(rebase_shaper(&entity.value_buffer, member, nullable))
                .buffered();
            if nullable {
                rebased = rebased.make_nullable();
            }
            rebased.into_expression()
        }
        _ => map_children(shaper, |child| rebase_shaper(child, member, nullable)),
    }
}

/// Rewrites a two-parameter join result selector `(o, i) => body` into a
/// one-parameter lambda over the transparent identifier.
fn transparent_selector(result_selector: &ExprRef) -> QueryResult<ExprRef> {
    let (parameters, body) = result_selector.as_lambda().ok_or_else(|| {
        QueryError::translation(result_selector.to_string(), "expected a lambda")
    })?;
    let [outer, inner] = parameters else {
        return Err(QueryError::translation(
            result_selector.to_string(),
            "join result selector must take two parameters",
        ));
    };
    let identifier = Expression::parameter(
        "t",
        ExprType::Object(TRANSPARENT_IDENTIFIER.to_string()),
    );
    let body = ReplacingExpressionVisitor::new(
        vec![outer.clone(), inner.clone()],
        vec![
            Expression::member(&identifier, MemberIdentity::outer(), outer.ty()),
            Expression::member(&identifier, MemberIdentity::inner(), inner.ty()),
        ],
    )
    .visit(body);
    Ok(Expression::lambda(vec![identifier], body))
}

/// Binds language-level accesses in `expr` to the query's current row.
///
/// Property access on an entity shaper becomes the property's expression in
/// the entity projection; projection bindings become their mapped
/// expressions. Constructs that have no row representation fail with a
/// translation error.
pub fn bind_expression(expr: &ExprRef, query: &QueryExpressionKind) -> QueryResult<ExprRef> {
    match expr.as_ref() {
        Expression::Member {
            expression: receiver,
            member,
            ..
        } => {
            let Some(shaper) = receiver.as_entity_shaper() else {
                return Err(QueryError::translation(
                    expr.to_string(),
                    "member access could not be bound to the projection",
                ));
            };
            match resolve_value_buffer(shaper, query)?.as_ref() {
                Expression::Extension(ExtensionExpression::EntityProjection(projection)) => projection
                    .bind_property_named(member.name())
                    .map_err(|e| QueryError::translation(expr.to_string(), e.to_string())),
                other => Err(QueryError::translation(
                    expr.to_string(),
                    format!("entity is bound to '{other}' instead of an entity projection"),
                )),
            }
        }
        Expression::Extension(ExtensionExpression::ProjectionBinding(binding)) => {
            query.get_mapped_projection(binding.member())
        }
        Expression::Extension(ExtensionExpression::EntityShaper(shaper)) => {
            Err(QueryError::translation(
                expr.to_string(),
                format!("entity '{}' cannot be used as a value", shaper.entity_type.name()),
            ))
        }
        Expression::Constant(ConstantValue::EntityQueryable(_))
        | Expression::Parameter { .. }
        | Expression::Lambda { .. }
        | Expression::Call { .. }
        | Expression::New { .. }
        | Expression::MemberInit { .. } => Err(QueryError::translation(
            expr.to_string(),
            "expression has no translation over the query's rows",
        )),
        Expression::ClientCall { name, .. } => Err(QueryError::translation(
            expr.to_string(),
            format!("client method '{name}' cannot be translated"),
        )),
        _ => try_map_children(expr, |child| bind_expression(child, query)),
    }
}

/// Binds a `Skip`/`Take` count, which must be an integer constant or query
/// parameter.
pub fn bind_row_count(count: &ExprRef, query: &QueryExpressionKind) -> QueryResult<ExprRef> {
    let bound = bind_expression(count, query)?;
    let accepted = match bound.as_ref() {
        Expression::Constant(_) => matches!(bound.as_constant(), Some(Value::Integer(i)) if *i >= 0),
        Expression::QueryParameter { ty, .. } => *ty == ScalarType::Integer,
        _ => false,
    };
    if accepted {
        Ok(bound)
    } else {
        Err(QueryError::translation(
            count.to_string(),
            "row count must be a non-negative integer constant or parameter",
        ))
    }
}

/// Returns the key parts of a join key selector body: the arguments of an
/// anonymous object in order, or the body itself.
pub(crate) fn key_parts(body: &ExprRef) -> Vec<ExprRef> {
    match body.as_ref() {
        Expression::New { arguments, .. } => arguments.iter().map(|(_, e)| e.clone()).collect(),
        _ => vec![body.clone()],
    }
}
