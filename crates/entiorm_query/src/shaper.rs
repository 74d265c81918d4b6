//! Shaped queries and entity shapers.

use crate::expression::{ExprRef, Expression, ExtensionExpression};
use crate::query_expression::QueryExpressionKind;
use entiorm_core::{EntityType, Value, ValueBuffer};
use std::sync::Arc;

/// How many results a query produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultCardinality {
    /// Any number of results.
    #[default]
    Enumerable,
    /// Exactly one result; none or several is an error.
    Single,
    /// At most one result; none yields a null result.
    SingleOrDefault,
}

/// A provider query expression paired with the shaper that turns each of its
/// rows into a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedQueryExpression {
    /// Provider query expression.
    pub query_expression: QueryExpressionKind,
    /// Shaper tree over the query expression's projection.
    pub shaper: ExprRef,
    /// Result cardinality.
    pub cardinality: ResultCardinality,
    /// Tracking requested by `AsTracking`/`AsNoTracking`, if any.
    pub tracking: Option<bool>,
}

impl ShapedQueryExpression {
    /// Creates an enumerable shaped query.
    pub fn new(query_expression: QueryExpressionKind, shaper: ExprRef) -> Self {
        Self {
            query_expression,
            shaper,
            cardinality: ResultCardinality::Enumerable,
            tracking: None,
        }
    }

    /// Returns a copy with a different shaper.
    #[must_use]
    pub fn with_shaper(mut self, shaper: ExprRef) -> Self {
        self.shaper = shaper;
        self
    }

    /// Wraps the shaped query in an expression node.
    pub fn into_expression(self) -> ExprRef {
        Expression::extension(ExtensionExpression::ShapedQuery(self))
    }
}

/// The four materialization strategies of an entity shaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaperKind {
    /// Reads from offset zero; a new instance per row.
    Unbuffered,
    /// Reads from offset zero; one instance per key within an execution.
    Buffered,
    /// Reads from a non-zero offset; a new instance per row.
    OffsetUnbuffered,
    /// Reads from a non-zero offset; one instance per key within an execution.
    OffsetBuffered,
}

/// Describes how to materialize one entity from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityShaperExpression {
    /// Materialized entity type.
    pub entity_type: Arc<EntityType>,
    /// Where the entity's values come from: a projection binding until the
    /// shaped query is compiled.
    pub value_buffer: ExprRef,
    /// Whether results are registered with the state manager.
    pub tracking: bool,
    /// Whether instances are reused for repeated keys within one execution.
    pub buffered: bool,
    /// Position of the entity's first property in the row.
    pub offset: usize,
    /// Whether a null key yields a null entity instead of an error.
    pub nullable: bool,
}

impl EntityShaperExpression {
    /// Creates an unbuffered, untracked shaper at offset zero.
    pub fn new(entity_type: Arc<EntityType>, value_buffer: ExprRef, nullable: bool) -> Self {
        Self {
            entity_type,
            value_buffer,
            tracking: false,
            buffered: false,
            offset: 0,
            nullable,
        }
    }

    /// Returns the materialization strategy.
    pub fn kind(&self) -> ShaperKind {
        match (self.offset > 0, self.buffered) {
            (false, false) => ShaperKind::Unbuffered,
            (false, true) => ShaperKind::Buffered,
            (true, false) => ShaperKind::OffsetUnbuffered,
            (true, true) => ShaperKind::OffsetBuffered,
        }
    }

    /// Returns a shaper reading `offset` positions further into the row.
    ///
    /// Offsets accumulate: applying `2` then `3` reads from offset `5`.
    #[must_use]
    pub fn with_offset(&self, offset: usize) -> Self {
        Self {
            offset: self.offset + offset,
            ..self.clone()
        }
    }

    /// Returns a shaper over a different value buffer.
    #[must_use]
    pub fn with_value_buffer(&self, value_buffer: ExprRef) -> Self {
        Self {
            value_buffer,
            ..self.clone()
        }
    }

    /// Returns a shaper with the given tracking flag.
    #[must_use]
    pub fn with_tracking(&self, tracking: bool) -> Self {
        Self {
            tracking,
            ..self.clone()
        }
    }

    /// Returns a buffered copy.
    #[must_use]
    pub fn buffered(&self) -> Self {
        Self {
            buffered: true,
            ..self.clone()
        }
    }

    /// Returns a copy that tolerates null keys.
    #[must_use]
    pub fn make_nullable(&self) -> Self {
        Self {
            nullable: true,
            ..self.clone()
        }
    }

    /// Extracts the primary key from a row; `None` if any key part is null
    /// or missing.
    pub fn key_values(&self, row: &ValueBuffer) -> Option<Vec<Value>> {
        self.entity_type
            .primary_key()
            .map(|p| match row.get(self.offset + p.index()) {
                Some(Value::Null) | None => None,
                Some(v) => Some(v.clone()),
            })
            .collect()
    }

    /// Wraps the shaper in an expression node.
    pub fn into_expression(self) -> ExprRef {
        Expression::extension(ExtensionExpression::EntityShaper(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExprType;
    use crate::projection::ProjectionMember;
    use entiorm_core::{Property, ScalarType};

    fn shaper() -> EntityShaperExpression {
        let et = EntityType::builder("Post")
            .property(Property::new("BlogId", ScalarType::Integer).key())
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Title", ScalarType::Text))
            .build()
            .unwrap();
        EntityShaperExpression::new(
            et,
            Expression::projection_binding(ProjectionMember::new(), ExprType::ValueBuffer),
            false,
        )
    }

    #[test]
    fn offsets_accumulate() {
        let s = shaper().with_offset(2).with_offset(3);
        assert_eq!(s.offset, 5);
        assert_eq!(s.kind(), ShaperKind::OffsetUnbuffered);
        assert_eq!(s.buffered().kind(), ShaperKind::OffsetBuffered);
        assert_eq!(shaper().kind(), ShaperKind::Unbuffered);
        assert_eq!(shaper().buffered().kind(), ShaperKind::Buffered);
    }

    #[test]
    fn composite_key_respects_offset() {
        let s = shaper().with_offset(1);
        let row = ValueBuffer::new(vec![
            Value::from("ignored"),
            Value::Integer(1),
            Value::Integer(2),
            Value::from("t"),
        ]);
        assert_eq!(
            s.key_values(&row),
            Some(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn null_key_part_yields_none() {
        let row = ValueBuffer::new(vec![Value::Integer(1), Value::Null, Value::from("t")]);
        assert_eq!(shaper().key_values(&row), None);
    }
}
