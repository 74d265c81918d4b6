//! In-memory query provider.
//!
//! Queries are translated into a [`ServerQuery`] operator tree and evaluated
//! against an [`InMemoryStore`] with client null semantics.

mod evaluator;
mod query_expression;
mod store;
mod translator;

pub use evaluator::InMemoryQueryEvaluator;
pub use query_expression::{InMemoryQueryExpression, ServerQuery};
pub use store::InMemoryStore;
pub use translator::{InMemoryExpressionTranslator, InMemoryQueryableMethodTranslatingVisitor};

use crate::error::{QueryError, QueryResult};
use crate::execution::QueryPlan;
use crate::pipeline::QueryProvider;
use crate::query_expression::QueryExpressionKind;
use crate::translation::QueryableMethodTranslatingVisitor;
use entiorm_core::EntityType;
use std::sync::Arc;

/// Provider that runs queries against an [`InMemoryStore`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryQueryProvider;

impl QueryProvider for InMemoryQueryProvider {
    fn name(&self) -> &'static str {
        "InMemory"
    }

    fn create_query_expression(&self, entity_type: &Arc<EntityType>) -> QueryExpressionKind {
        QueryExpressionKind::InMemory(InMemoryQueryExpression::new(entity_type.clone()))
    }

    fn create_translator(&self) -> Box<dyn QueryableMethodTranslatingVisitor> {
        Box::new(InMemoryQueryableMethodTranslatingVisitor)
    }

    fn create_plan(&self, query: &QueryExpressionKind) -> QueryResult<QueryPlan> {
        match query {
            QueryExpressionKind::InMemory(q) => Ok(QueryPlan::InMemory(q.server_query().clone())),
            other => Err(QueryError::translation(
                other.to_string(),
                "the in-memory provider cannot execute this query expression",
            )),
        }
    }
}
