//! The query compilation pipeline.
//!
//! Stages run in a fixed order, each consuming the previous stage's output:
//!
//! 1. query optimization ([`QueryOptimizingExpressionVisitor`])
//! 2. entity queryable to shaped query ([`EntityQueryableExpressionVisitor`])
//! 3. queryable method translation (provider visitor)
//! 4. shaped query optimization ([`QueryProvider::optimize_shaped_query`])
//! 5. shaped query compilation ([`ShapedQueryCompiler`])

mod stages;

pub use stages::{EntityQueryableExpressionVisitor, QueryOptimizingExpressionVisitor};

use crate::cache::{CacheKey, CompiledQueryCache};
use crate::compiler::ShapedQueryCompiler;
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::execution::{CompiledQuery, QueryPlan};
use crate::expression::ExprRef;
use crate::materializer::{DefaultEntityMaterializerSource, EntityMaterializerSource, Materialized};
use crate::query_expression::QueryExpressionKind;
use crate::shaper::ShapedQueryExpression;
use crate::translation::QueryableMethodTranslatingVisitor;
use crate::visitor::ExpressionVisitor;
use entiorm_core::{Config, EntityType, QueryTrackingBehavior};
use std::sync::Arc;

/// The extension points a query provider supplies to the pipeline.
pub trait QueryProvider: Send + Sync {
    /// Provider name; part of the compiled query cache key.
    fn name(&self) -> &'static str;

    /// Creates the query expression for a query root over `entity_type`.
    fn create_query_expression(&self, entity_type: &Arc<EntityType>) -> QueryExpressionKind;

    /// Creates the operator translator for one compilation.
    fn create_translator(&self) -> Box<dyn QueryableMethodTranslatingVisitor>;

    /// Post-translation cleanup of a shaped query.
    fn optimize_shaped_query(
        &self,
        shaped: ShapedQueryExpression,
    ) -> QueryResult<ShapedQueryExpression> {
        Ok(shaped)
    }

    /// Builds what executes against the store.
    fn create_plan(&self, query: &QueryExpressionKind) -> QueryResult<QueryPlan>;

    /// Returns the source that builds entity instances from rows.
    fn materializer_source(&self) -> Arc<dyn EntityMaterializerSource> {
        Arc::new(DefaultEntityMaterializerSource)
    }
}

/// Compiles and executes queries for one provider.
pub struct QueryCompiler {
    provider: Arc<dyn QueryProvider>,
    config: Config,
    cache: CompiledQueryCache,
}

impl QueryCompiler {
    /// Creates a compiler for `provider`.
    pub fn new(provider: Arc<dyn QueryProvider>, config: Config) -> Self {
        Self {
            cache: CompiledQueryCache::new(config.query_cache_capacity),
            provider,
            config,
        }
    }

    /// Returns the provider.
    pub fn provider(&self) -> &Arc<dyn QueryProvider> {
        &self.provider
    }

    /// Returns the compiled query cache.
    pub fn cache(&self) -> &CompiledQueryCache {
        &self.cache
    }

    /// Compiles `query`, reusing an earlier compilation of the same shape.
    pub fn compile(&self, query: &ExprRef) -> QueryResult<Arc<CompiledQuery>> {
        let key = CacheKey::new(
            query.to_string(),
            self.provider.name(),
            self.config.default_tracking,
        );
        self.cache.get_or_compile(key, || self.compile_uncached(query))
    }

    /// Runs every pipeline stage on `query`.
    pub fn compile_uncached(&self, query: &ExprRef) -> QueryResult<CompiledQuery> {
        let _span = tracing::debug_span!("compile_query", provider = self.provider.name()).entered();

        let optimized = QueryOptimizingExpressionVisitor.visit(query);
        let rooted = EntityQueryableExpressionVisitor::new(self.provider.as_ref()).visit(&optimized);
        let shaped = self.provider.create_translator().translate(&rooted)?;
        let shaped = self.provider.optimize_shaped_query(shaped)?;
        tracing::debug!(query = %shaped.query_expression, "translated query");

        let tracking = shaped
            .tracking
            .unwrap_or(self.config.default_tracking == QueryTrackingBehavior::TrackAll);
        let plan = self.provider.create_plan(&shaped.query_expression)?;
        ShapedQueryCompiler::new(self.provider.materializer_source(), tracking).compile(&shaped, plan)
    }

    /// Compiles (or reuses) and executes `query`.
    pub fn execute(&self, query: &ExprRef, ctx: &QueryContext) -> QueryResult<Vec<Materialized>> {
        self.compile(query)?.execute(ctx)
    }

    /// Asynchronous counterpart of [`QueryCompiler::execute`].
    pub async fn execute_async(
        &self,
        query: &ExprRef,
        ctx: &QueryContext,
    ) -> QueryResult<Vec<Materialized>> {
        let compiled = self.compile(query)?;
        compiled.execute_async(ctx).await
    }
}

impl std::fmt::Debug for QueryCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCompiler")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}
