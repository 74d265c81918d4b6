//! Relational query provider.
//!
//! Queries are translated into a [`SelectExpression`], rendered as SQL by a
//! [`QuerySqlGenerator`] and executed through a
//! [`RelationalConnection`](entiorm_core::RelationalConnection).

pub mod predicate;
mod select;
mod sql_generator;
mod translator;

pub use select::{JoinExpression, JoinKind, SelectExpression, TableExpression};
pub use sql_generator::{PagingStyle, QuerySqlGenerator, RelationalCommandTemplate};
pub use translator::{RelationalQueryableMethodTranslatingVisitor, RelationalExpressionTranslator};

use crate::error::{QueryError, QueryResult};
use crate::execution::QueryPlan;
use crate::pipeline::QueryProvider;
use crate::query_expression::QueryExpressionKind;
use crate::translation::QueryableMethodTranslatingVisitor;
use entiorm_core::EntityType;
use std::sync::Arc;

/// Provider that translates queries to SQL.
#[derive(Debug, Clone, Default)]
pub struct RelationalQueryProvider {
    generator: QuerySqlGenerator,
}

impl RelationalQueryProvider {
    /// Creates a provider rendering SQL with `generator`.
    pub fn new(generator: QuerySqlGenerator) -> Self {
        Self { generator }
    }

    /// SQL Server flavored provider.
    pub fn sql_server() -> Self {
        Self::new(QuerySqlGenerator::sql_server())
    }

    /// Returns the SQL generator.
    pub fn generator(&self) -> &QuerySqlGenerator {
        &self.generator
    }
}

impl QueryProvider for RelationalQueryProvider {
    fn name(&self) -> &'static str {
        self.generator.name()
    }

    fn create_query_expression(&self, entity_type: &Arc<EntityType>) -> QueryExpressionKind {
        QueryExpressionKind::Select(SelectExpression::new(entity_type.clone()))
    }

    fn create_translator(&self) -> Box<dyn QueryableMethodTranslatingVisitor> {
        Box::new(RelationalQueryableMethodTranslatingVisitor)
    }

    fn create_plan(&self, query: &QueryExpressionKind) -> QueryResult<QueryPlan> {
        match query {
            QueryExpressionKind::Select(select) => {
                Ok(QueryPlan::Relational(self.generator.generate(select)?))
            }
            other => Err(QueryError::translation(
                other.to_string(),
                "the relational provider cannot execute this query expression",
            )),
        }
    }
}
