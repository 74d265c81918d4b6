//! Compiled queries and their execution.

use crate::compiler::ShaperFn;
use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::expression::ExprRef;
use crate::in_memory::{InMemoryQueryEvaluator, ServerQuery};
use crate::materializer::Materialized;
use crate::relational::RelationalCommandTemplate;
use crate::shaper::ResultCardinality;
use entiorm_core::{AsyncDataReader, CoreError, DataReader, ValueBuffer};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::fmt;

/// What a compiled query runs against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Operator tree evaluated against an in-memory store.
    InMemory(ServerQuery),
    /// SQL executed through a relational connection.
    Relational(RelationalCommandTemplate),
}

impl QueryPlan {
    /// Returns the SQL text of a relational plan.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Relational(template) => Some(template.text()),
            Self::InMemory(_) => None,
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory(query) => write!(f, "{query}"),
            Self::Relational(template) => f.write_str(template.text()),
        }
    }
}

/// A query compiled once and executable many times, with different
/// parameter values and contexts.
#[derive(Clone)]
pub struct CompiledQuery {
    plan: QueryPlan,
    shaper: ShaperFn,
    shaper_expression: ExprRef,
    cardinality: ResultCardinality,
    tracking: bool,
}

impl CompiledQuery {
    pub(crate) fn new(
        plan: QueryPlan,
        shaper: ShaperFn,
        shaper_expression: ExprRef,
        cardinality: ResultCardinality,
        tracking: bool,
    ) -> Self {
        Self {
            plan,
            shaper,
            shaper_expression,
            cardinality,
            tracking,
        }
    }

    /// Returns the plan.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Returns the SQL text for relational queries.
    pub fn sql(&self) -> Option<&str> {
        self.plan.sql()
    }

    /// Returns the resolved shaper tree the per-row closure was built from.
    pub fn shaper_expression(&self) -> &ExprRef {
        &self.shaper_expression
    }

    /// Returns the result cardinality.
    pub fn cardinality(&self) -> ResultCardinality {
        self.cardinality
    }

    /// Returns true if materialized entities are tracked.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Starts an execution and returns a lazy iterator over the shaped rows.
    pub fn enumerate<'a>(&self, ctx: &'a QueryContext) -> QueryResult<QueryIterator<'a>> {
        ctx.begin_execution()?;
        let rows = match &self.plan {
            QueryPlan::InMemory(query) => {
                let store = ctx.store()?;
                let rows = InMemoryQueryEvaluator::new(store, ctx.parameters()).evaluate(query)?;
                RowSource::Buffered(rows.into_iter())
            }
            QueryPlan::Relational(template) => {
                let command = template.to_command(ctx.parameters())?;
                tracing::debug!(sql = %command.text, "executing query");
                RowSource::Reader(ctx.connection()?.execute_reader(&command)?)
            }
        };
        Ok(QueryIterator {
            ctx,
            rows,
            shaper: self.shaper.clone(),
        })
    }

    /// Executes the query and collects every result.
    ///
    /// For a single-result query the one result is checked against the
    /// cardinality and returned as the only element.
    pub fn execute(&self, ctx: &QueryContext) -> QueryResult<Vec<Materialized>> {
        let results = self.enumerate(ctx)?;
        match self.cardinality {
            ResultCardinality::Enumerable => results.collect(),
            cardinality => Ok(vec![single(results, cardinality)?]),
        }
    }

    /// Executes a single-result query (`First`, `Single`, `Count`, ...).
    pub fn execute_single(&self, ctx: &QueryContext) -> QueryResult<Materialized> {
        match self.cardinality {
            ResultCardinality::Enumerable => Err(CoreError::invalid_operation(
                "query returns a sequence, not a single result",
            )
            .into()),
            cardinality => single(self.enumerate(ctx)?, cardinality),
        }
    }

    /// Starts an asynchronous execution and returns a single-pass stream
    /// over the shaped rows.
    ///
    /// Rows are shaped by the same closure as [`CompiledQuery::enumerate`];
    /// the stream suspends only when the reader advances and checks the
    /// context's cancellation token before every row.
    pub async fn enumerate_async<'a>(
        &self,
        ctx: &'a QueryContext,
    ) -> QueryResult<BoxStream<'a, QueryResult<Materialized>>> {
        ctx.begin_execution()?;
        let shaper = self.shaper.clone();
        match &self.plan {
            QueryPlan::InMemory(query) => {
                let store = ctx.store()?;
                let rows = InMemoryQueryEvaluator::new(store, ctx.parameters()).evaluate(query)?;
                Ok(stream::iter(rows)
                    .map(move |row| -> QueryResult<Materialized> {
                        ctx.cancellation().check()?;
                        shaper(ctx, &row)
                    })
                    .boxed())
            }
            QueryPlan::Relational(template) => {
                let command = template.to_command(ctx.parameters())?;
                tracing::debug!(sql = %command.text, "executing query asynchronously");
                let reader = ctx.connection()?.execute_reader_async(&command).await?;
                Ok(stream::try_unfold(reader, move |reader| {
                    next_shaped(ctx, shaper.clone(), reader)
                })
                .boxed())
            }
        }
    }

    /// Asynchronous counterpart of [`CompiledQuery::execute`].
    pub async fn execute_async(&self, ctx: &QueryContext) -> QueryResult<Vec<Materialized>> {
        let mut results = self.enumerate_async(ctx).await?;
        match self.cardinality {
            ResultCardinality::Enumerable => results.try_collect().await,
            cardinality => {
                let first = results.try_next().await?;
                let second = match first {
                    Some(_) => results.try_next().await?,
                    None => None,
                };
                Ok(vec![apply_cardinality(first, second.is_some(), cardinality)?])
            }
        }
    }

    /// Asynchronous counterpart of [`CompiledQuery::execute_single`].
    pub async fn execute_single_async(&self, ctx: &QueryContext) -> QueryResult<Materialized> {
        if self.cardinality == ResultCardinality::Enumerable {
            return Err(CoreError::invalid_operation(
                "query returns a sequence, not a single result",
            )
            .into());
        }
        let mut results = self.execute_async(ctx).await?;
        results
            .pop()
            .ok_or_else(|| QueryError::evaluation("single-result query produced no value"))
    }
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("plan", &self.plan)
            .field("shaper", &self.shaper_expression.to_string())
            .field("cardinality", &self.cardinality)
            .field("tracking", &self.tracking)
            .finish()
    }
}

async fn next_shaped(
    ctx: &QueryContext,
    shaper: ShaperFn,
    mut reader: Box<dyn AsyncDataReader>,
) -> QueryResult<Option<(Materialized, Box<dyn AsyncDataReader>)>> {
    ctx.cancellation().check()?;
    if !reader.read_async().await? {
        return Ok(None);
    }
    let row = reader.value_buffer()?;
    let result = shaper(ctx, &row)?;
    Ok(Some((result, reader)))
}

fn single(
    mut results: impl Iterator<Item = QueryResult<Materialized>>,
    cardinality: ResultCardinality,
) -> QueryResult<Materialized> {
    let first = results.next().transpose()?;
    let has_second = match first {
        Some(_) => results.next().transpose()?.is_some(),
        None => false,
    };
    apply_cardinality(first, has_second, cardinality)
}

fn apply_cardinality(
    first: Option<Materialized>,
    has_second: bool,
    cardinality: ResultCardinality,
) -> QueryResult<Materialized> {
    if has_second {
        return Err(QueryError::MoreThanOneElement);
    }
    match (first, cardinality) {
        (Some(result), _) => Ok(result),
        (None, ResultCardinality::SingleOrDefault) => Ok(Materialized::Null),
        (None, _) => Err(QueryError::NoElements),
    }
}

enum RowSource {
    Buffered(std::vec::IntoIter<ValueBuffer>),
    Reader(Box<dyn DataReader>),
}

impl RowSource {
    fn next_row(&mut self) -> QueryResult<Option<ValueBuffer>> {
        match self {
            Self::Buffered(rows) => Ok(rows.next()),
            Self::Reader(reader) => {
                if reader.read()? {
                    Ok(Some(reader.value_buffer()?))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Lazy, single-pass iterator over the results of one execution.
pub struct QueryIterator<'a> {
    ctx: &'a QueryContext,
    rows: RowSource,
    shaper: ShaperFn,
}

impl Iterator for QueryIterator<'_> {
    type Item = QueryResult<Materialized>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.ctx.cancellation().check() {
            return Some(Err(e.into()));
        }
        match self.rows.next_row() {
            Ok(Some(row)) => Some((self.shaper)(self.ctx, &row)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl fmt::Debug for QueryIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.rows {
            RowSource::Buffered(_) => "buffered",
            RowSource::Reader(_) => "reader",
        };
        f.debug_struct("QueryIterator").field("source", &source).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::Value;

    fn scalar(i: i64) -> QueryResult<Materialized> {
        Ok(Materialized::Scalar(Value::Integer(i)))
    }

    #[test]
    fn single_requires_exactly_one() {
        assert!(matches!(
            single(std::iter::empty(), ResultCardinality::Single),
            Err(QueryError::NoElements)
        ));
        assert!(matches!(
            single(vec![scalar(1), scalar(2)].into_iter(), ResultCardinality::Single),
            Err(QueryError::MoreThanOneElement)
        ));
        assert!(single(vec![scalar(1)].into_iter(), ResultCardinality::Single).is_ok());
    }

    #[test]
    fn single_or_default_yields_null_when_empty() {
        assert!(single(std::iter::empty(), ResultCardinality::SingleOrDefault)
            .unwrap()
            .is_null());
        assert!(matches!(
            single(vec![scalar(1), scalar(2)].into_iter(), ResultCardinality::SingleOrDefault),
            Err(QueryError::MoreThanOneElement)
        ));
    }

    #[test]
    fn row_errors_surface_before_cardinality() {
        let rows = vec![Err(QueryError::evaluation("boom"))];
        assert!(matches!(
            single(rows.into_iter(), ResultCardinality::Single),
            Err(QueryError::Evaluation { .. })
        ));
    }
}
