//! Shaped query compilation: from a shaper tree to a per-row closure.

use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::execution::{CompiledQuery, QueryPlan};
use crate::expression::{ConstantValue, ExprRef, ExprType, Expression, ExtensionExpression, ValueBufferRead};
use crate::materializer::{EntityMaterializerSource, MaterializationContext, Materialized};
use crate::projection::ProjectionIndex;
use crate::query_expression::{QueryExpression, QueryExpressionKind};
use crate::shaper::{EntityShaperExpression, ShapedQueryExpression};
use crate::visitor::try_map_children;
use entiorm_core::{EntityEntry, EntityState, Value, ValueBuffer};
use std::sync::Arc;

/// A compiled shaper: turns one physical row into one result.
pub type ShaperFn =
    Arc<dyn Fn(&QueryContext, &ValueBuffer) -> QueryResult<Materialized> + Send + Sync>;

/// Name of the row parameter entity shapers read from once compiled.
pub const VALUE_BUFFER_PARAMETER: &str = "valueBuffer";

/// Compiles the shaper of a translated query.
///
/// Projection bindings are resolved against the final row layout of the
/// query expression: scalar members become reads at their slot, entity
/// shapers get the offset of their entity's first value. The resolved tree
/// is then turned into a closure once and reused for every row.
#[derive(Debug, Clone)]
pub struct ShapedQueryCompiler {
    materializer: Arc<dyn EntityMaterializerSource>,
    tracking: bool,
}

impl ShapedQueryCompiler {
    /// Creates a compiler; `tracking` applies to every entity shaper.
    pub fn new(materializer: Arc<dyn EntityMaterializerSource>, tracking: bool) -> Self {
        Self {
            materializer,
            tracking,
        }
    }

    /// Compiles `shaped` into an executable query over `plan`.
    pub fn compile(&self, shaped: &ShapedQueryExpression, plan: QueryPlan) -> QueryResult<CompiledQuery> {
        let resolved = self.resolve(&shaped.shaper, &shaped.query_expression)?;
        let shaper = self.build(&resolved)?;
        tracing::debug!(
            shaper = %resolved,
            cardinality = ?shaped.cardinality,
            tracking = self.tracking,
            "compiled shaped query"
        );
        Ok(CompiledQuery::new(
            plan,
            shaper,
            resolved,
            shaped.cardinality,
            self.tracking,
        ))
    }

    /// Replaces every projection binding of `shaper` by a read of the final
    /// row layout.
    pub fn resolve(&self, shaper: &ExprRef, query: &QueryExpressionKind) -> QueryResult<ExprRef> {
        match shaper.as_ref() {
            Expression::Extension(ExtensionExpression::ProjectionBinding(binding)) => {
                match query.projection_index(binding.member())? {
                    ProjectionIndex::Slot(index) => Ok(ValueBufferRead::expression(
                        index,
                        binding.ty().clone(),
                        true,
                        None,
                    )),
                    ProjectionIndex::EntityValues { entity_type, .. } => Err(QueryError::translation(
                        shaper.to_string(),
                        format!("entity '{}' bound as a scalar", entity_type.name()),
                    )),
                }
            }
            Expression::Extension(ExtensionExpression::EntityShaper(entity)) => {
                let Expression::Extension(ExtensionExpression::ProjectionBinding(binding)) =
                    entity.value_buffer.as_ref()
                else {
                    return Ok(shaper.clone());
                };
                match query.projection_index(binding.member())? {
                    ProjectionIndex::EntityValues { start, .. } => Ok(entity
                        .with_offset(start)
                        .with_value_buffer(Expression::parameter(
                            VALUE_BUFFER_PARAMETER,
                            ExprType::ValueBuffer,
                        ))
                        .with_tracking(self.tracking)
                        .into_expression()),
                    ProjectionIndex::Slot(index) => Err(QueryError::translation(
                        shaper.to_string(),
                        format!("entity shaper bound to scalar slot {index}"),
                    )),
                }
            }
            _ => try_map_children(shaper, |child| self.resolve(child, query)),
        }
    }

    fn build(&self, expr: &ExprRef) -> QueryResult<ShaperFn> {
        match expr.as_ref() {
            Expression::Extension(ExtensionExpression::ValueBufferRead(read)) => {
                let index = read.index;
                Ok(Arc::new(move |_, row| match row.get(index) {
                    Some(Value::Null) => Ok(Materialized::Null),
                    Some(value) => Ok(Materialized::Scalar(value.clone())),
                    None => Err(QueryError::evaluation(format!(
                        "row of {} values has no position {index}",
                        row.len()
                    ))),
                }))
            }
            Expression::Constant(ConstantValue::Value(value)) => {
                let value = value.clone();
                Ok(Arc::new(move |_, _| {
                    Ok(match &value {
                        Value::Null => Materialized::Null,
                        v => Materialized::Scalar(v.clone()),
                    })
                }))
            }
            Expression::QueryParameter { name, .. } => {
                let name = name.clone();
                Ok(Arc::new(move |ctx, _| match ctx.parameter(&name)? {
                    Value::Null => Ok(Materialized::Null),
                    v => Ok(Materialized::Scalar(v.clone())),
                }))
            }
            Expression::New {
                type_name,
                arguments: members,
            }
            | Expression::MemberInit {
                type_name,
                bindings: members,
            } => {
                let type_name = type_name.clone();
                let fields = members
                    .iter()
                    .map(|(member, e)| Ok((member.name().to_string(), self.build(e)?)))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Arc::new(move |ctx, row| {
                    let values = fields
                        .iter()
                        .map(|(name, field)| Ok((name.clone(), field(ctx, row)?)))
                        .collect::<QueryResult<Vec<_>>>()?;
                    Ok(Materialized::Object {
                        type_name: type_name.clone(),
                        fields: values,
                    })
                }))
            }
            Expression::Extension(ExtensionExpression::EntityShaper(shaper)) => {
                Ok(self.entity_shaper(shaper.clone()))
            }
            _ => Err(QueryError::translation(
                expr.to_string(),
                "expression cannot be materialized from a row",
            )),
        }
    }

    fn entity_shaper(&self, shaper: EntityShaperExpression) -> ShaperFn {
        let source = self.materializer.clone();
        Arc::new(move |ctx, row| {
            let entity_type = &shaper.entity_type;
            let Some(key) = shaper.key_values(row) else {
                return if shaper.nullable {
                    Ok(Materialized::Null)
                } else {
                    Err(QueryError::InvalidKey {
                        entity_type: entity_type.name().to_string(),
                    })
                };
            };
            let materialize = || {
                source.materialize(&MaterializationContext::new(row, shaper.offset, entity_type))
            };

            let entry = if shaper.tracking {
                let state_manager = ctx.state_manager();
                match state_manager.try_get(entity_type, &key) {
                    Some(entry) => entry,
                    None => state_manager.start_tracking_from_query(entity_type, key, materialize()?),
                }
            } else if shaper.buffered {
                ctx.buffered_entry(entity_type, key, || {
                    Ok(Arc::new(EntityEntry::new(
                        entity_type.clone(),
                        materialize()?,
                        EntityState::Detached,
                    )))
                })?
            } else {
                Arc::new(EntityEntry::new(
                    entity_type.clone(),
                    materialize()?,
                    EntityState::Detached,
                ))
            };
            tracing::trace!(entity_type = entity_type.name(), "materialized entity");
            Ok(Materialized::Entity(entry))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryQueryExpression;
    use crate::materializer::DefaultEntityMaterializerSource;
    use crate::projection::ProjectionMember;
    use entiorm_core::{EntityType, Property, ScalarType, StateManager};

    fn blog() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Name", ScalarType::Text).nullable())
            .build()
            .unwrap()
    }

    fn shaped(buffered: bool) -> ShapedQueryExpression {
        let et = blog();
        let binding = Expression::projection_binding(ProjectionMember::new(), ExprType::ValueBuffer);
        let mut shaper = EntityShaperExpression::new(et.clone(), binding, false);
        shaper.buffered = buffered;
        ShapedQueryExpression::new(
            QueryExpressionKind::InMemory(InMemoryQueryExpression::new(et)),
            shaper.into_expression(),
        )
    }

    fn compiler(tracking: bool) -> ShapedQueryCompiler {
        ShapedQueryCompiler::new(Arc::new(DefaultEntityMaterializerSource), tracking)
    }

    #[test]
    fn entity_binding_resolves_to_offset_shaper() {
        let shaped = shaped(false);
        let resolved = compiler(true).resolve(&shaped.shaper, &shaped.query_expression).unwrap();
        let entity = resolved.as_entity_shaper().unwrap();
        assert_eq!(entity.offset, 0);
        assert!(entity.tracking);
        assert_eq!(resolved.to_string(), "UnbufferedEntityShaper<Blog>(offset: 0, valueBuffer)");
    }

    #[test]
    fn tracking_shaper_returns_tracked_instance() {
        let shaped = shaped(false);
        let c = compiler(true);
        let shaper = c.build(&c.resolve(&shaped.shaper, &shaped.query_expression).unwrap()).unwrap();
        let ctx = QueryContext::new(Arc::new(StateManager::new()));
        let row = ValueBuffer::new(vec![Value::Integer(1), Value::from("a")]);

        let first = shaper(&ctx, &row).unwrap();
        let second = shaper(&ctx, &row).unwrap();
        assert!(Arc::ptr_eq(first.as_entity().unwrap(), second.as_entity().unwrap()));
        assert_eq!(ctx.state_manager().len(), 1);
        assert_eq!(first.as_entity().unwrap().state(), EntityState::Unchanged);
    }

    #[test]
    fn untracked_unbuffered_shaper_creates_new_instances() {
        let shaped = shaped(false);
        let c = compiler(false);
        let shaper = c.build(&c.resolve(&shaped.shaper, &shaped.query_expression).unwrap()).unwrap();
        let ctx = QueryContext::new(Arc::new(StateManager::new()));
        let row = ValueBuffer::new(vec![Value::Integer(1), Value::Null]);

        let first = shaper(&ctx, &row).unwrap();
        let second = shaper(&ctx, &row).unwrap();
        assert!(!Arc::ptr_eq(first.as_entity().unwrap(), second.as_entity().unwrap()));
        assert_eq!(first.as_entity().unwrap().state(), EntityState::Detached);
        assert!(ctx.state_manager().is_empty());
    }

    #[test]
    fn buffered_shaper_reuses_instances_within_execution() {
        let shaped = shaped(true);
        let c = compiler(false);
        let shaper = c.build(&c.resolve(&shaped.shaper, &shaped.query_expression).unwrap()).unwrap();
        let ctx = QueryContext::new(Arc::new(StateManager::new()));
        let row = ValueBuffer::new(vec![Value::Integer(1), Value::Null]);

        let first = shaper(&ctx, &row).unwrap();
        let second = shaper(&ctx, &row).unwrap();
        assert!(Arc::ptr_eq(first.as_entity().unwrap(), second.as_entity().unwrap()));
    }

    #[test]
    fn null_key_fails_unless_nullable() {
        let shaped = shaped(false);
        let c = compiler(false);
        let resolved = c.resolve(&shaped.shaper, &shaped.query_expression).unwrap();
        let strict = c.build(&resolved).unwrap();
        let lenient = c
            .build(&resolved.as_entity_shaper().unwrap().make_nullable().into_expression())
            .unwrap();
        let ctx = QueryContext::new(Arc::new(StateManager::new()));
        let row = ValueBuffer::nulls(2);

        assert!(matches!(
            strict(&ctx, &row).unwrap_err(),
            QueryError::InvalidKey { entity_type } if entity_type == "Blog"
        ));
        assert!(lenient(&ctx, &row).unwrap().is_null());
    }
}
