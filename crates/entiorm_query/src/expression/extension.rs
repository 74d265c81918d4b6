//! Pipeline and provider specific nodes.

use crate::error::{QueryError, QueryResult};
use crate::expression::{ExprRef, ExprType, Expression};
use crate::projection::ProjectionBindingExpression;
use crate::shaper::{EntityShaperExpression, ShapedQueryExpression};
use entiorm_core::{EntityType, Property, ScalarType};
use std::sync::Arc;

/// The closed set of nodes added on top of the language-level tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionExpression {
    /// A provider query expression plus the shaper that builds results.
    ShapedQuery(ShapedQueryExpression),
    /// Materializes one entity from a row.
    EntityShaper(EntityShaperExpression),
    /// Placeholder resolved through the owning query expression.
    ProjectionBinding(ProjectionBindingExpression),
    /// Reads one value from the current physical row.
    ValueBufferRead(ValueBufferRead),
    /// The per-property values of an entity in the current row.
    EntityProjection(EntityProjectionExpression),
    /// A column of a table in a SQL select.
    Column(ColumnExpression),
    /// `operand [NOT] IN (values)`
    In {
        /// Tested value.
        operand: ExprRef,
        /// Candidate values.
        values: Vec<ExprRef>,
        /// `NOT IN` when set.
        negated: bool,
    },
    /// `operand IS [NOT] NULL`
    IsNull {
        /// Tested value.
        operand: ExprRef,
        /// `IS NOT NULL` when set.
        negated: bool,
    },
    /// A store function call such as `COUNT(*)`.
    SqlFunction {
        /// Function name.
        name: String,
        /// Arguments; empty renders as `*`.
        arguments: Vec<ExprRef>,
        /// Result type.
        ty: ScalarType,
    },
}

impl ExtensionExpression {
    /// Returns the static type of the node.
    pub fn ty(&self) -> ExprType {
        match self {
            Self::ShapedQuery(_) => ExprType::Queryable,
            Self::EntityShaper(shaper) => ExprType::Entity(shaper.entity_type.name().to_string()),
            Self::ProjectionBinding(binding) => binding.ty().clone(),
            Self::ValueBufferRead(read) => read.ty.clone(),
            Self::EntityProjection(_) => ExprType::ValueBuffer,
            Self::Column(column) => ExprType::Scalar(column.ty),
            Self::In { .. } | Self::IsNull { .. } => ExprType::Scalar(ScalarType::Bool),
            Self::SqlFunction { ty, .. } => ExprType::Scalar(*ty),
        }
    }
}

/// Reads the value at `index` of the current row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueBufferRead {
    /// Position in the row.
    pub index: usize,
    /// Expected type.
    pub ty: ExprType,
    /// Whether the value may be null.
    pub nullable: bool,
    /// Property the value belongs to, if any.
    pub property: Option<String>,
}

impl ValueBufferRead {
    /// Creates a read node.
    pub fn expression(index: usize, ty: ExprType, nullable: bool, property: Option<&str>) -> ExprRef {
        Expression::extension(ExtensionExpression::ValueBufferRead(Self {
            index,
            ty,
            nullable,
            property: property.map(str::to_string),
        }))
    }

    /// Creates a read node for a property stored at `index`.
    pub fn for_property(index: usize, property: &Property, nullable: bool) -> ExprRef {
        Self::expression(
            index,
            ExprType::Scalar(property.scalar_type()),
            nullable || property.is_nullable(),
            Some(property.name()),
        )
    }

    /// Returns a copy of a read node at a different position, optionally
    /// forced nullable; other nodes are returned unchanged.
    pub fn remap(expr: &ExprRef, shift: usize, make_nullable: bool) -> ExprRef {
        match expr.as_ref() {
            Expression::Extension(ExtensionExpression::ValueBufferRead(read)) => {
                Expression::extension(ExtensionExpression::ValueBufferRead(Self {
                    index: read.index + shift,
                    nullable: read.nullable || make_nullable,
                    ..read.clone()
                }))
            }
            _ => expr.clone(),
        }
    }
}

/// A column reference qualified by its table alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnExpression {
    /// Column name.
    pub name: String,
    /// Alias of the table the column belongs to.
    pub table_alias: String,
    /// Column type.
    pub ty: ScalarType,
    /// Whether the column may be null.
    pub nullable: bool,
}

impl ColumnExpression {
    /// Creates a column node for a property of the table aliased `table_alias`.
    pub fn for_property(property: &Property, table_alias: &str) -> ExprRef {
        Expression::extension(ExtensionExpression::Column(Self {
            name: property.column_name().to_string(),
            table_alias: table_alias.to_string(),
            ty: property.scalar_type(),
            nullable: property.is_nullable(),
        }))
    }
}

/// Where each property of an entity lives in the current row.
///
/// `properties[i]` is the read (in-memory) or column (relational) for the
/// property with index `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityProjectionExpression {
    /// Projected entity type.
    pub entity_type: Arc<EntityType>,
    /// One expression per property, in property order.
    pub properties: Vec<ExprRef>,
    /// Whether the entity may be absent (outer join).
    pub nullable: bool,
}

impl EntityProjectionExpression {
    /// Creates a projection node.
    pub fn new(entity_type: Arc<EntityType>, properties: Vec<ExprRef>, nullable: bool) -> Self {
        Self {
            entity_type,
            properties,
            nullable,
        }
    }

    /// Returns the expression for a property.
    pub fn bind_property(&self, property: &Property) -> QueryResult<ExprRef> {
        self.properties.get(property.index()).cloned().ok_or_else(|| {
            QueryError::translation(
                format!("{}.{}", self.entity_type.name(), property.name()),
                "property is not part of the entity projection",
            )
        })
    }

    /// Returns the expression for a property by name.
    pub fn bind_property_named(&self, name: &str) -> QueryResult<ExprRef> {
        let property = self.entity_type.property(name)?;
        self.bind_property(property)
    }

    /// Wraps the projection in an expression node.
    pub fn into_expression(self) -> ExprRef {
        Expression::extension(ExtensionExpression::EntityProjection(self))
    }
}
