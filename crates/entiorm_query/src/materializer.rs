//! Materialized results and the entity materializer source.

use crate::error::QueryResult;
use entiorm_core::{CoreError, EntityEntry, EntityType, UpdateEntry, Value, ValueBuffer};
use std::fmt;
use std::sync::Arc;

/// One result produced by a compiled shaper.
#[derive(Debug, Clone)]
pub enum Materialized {
    /// A null scalar, or an absent entity after an outer join.
    Null,
    /// A scalar value.
    Scalar(Value),
    /// An entity; tracked results share the state manager's entry.
    Entity(Arc<EntityEntry>),
    /// A structural object, fields in declaration order.
    Object {
        /// Constructed type.
        type_name: String,
        /// Field names and values.
        fields: Vec<(String, Materialized)>,
    },
}

impl Materialized {
    /// Returns true for [`Materialized::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the scalar value, treating `Null` as [`Value::Null`].
    pub fn as_scalar(&self) -> Option<&Value> {
        const NULL: &Value = &Value::Null;
        match self {
            Self::Scalar(v) => Some(v),
            Self::Null => Some(NULL),
            _ => None,
        }
    }

    /// Returns the entity entry.
    pub fn as_entity(&self) -> Option<&Arc<EntityEntry>> {
        match self {
            Self::Entity(entry) => Some(entry),
            _ => None,
        }
    }

    /// Returns a field of a structural object.
    pub fn field(&self, name: &str) -> Option<&Materialized> {
        match self {
            Self::Object { fields, .. } => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl fmt::Display for Materialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Entity(entry) => write!(f, "{}{:?}", entry.entity_type().name(), entry.values()),
            Self::Object { type_name, fields } => {
                write!(f, "{type_name} {{ ")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

/// Binds the start of an entity's values in a row to its entity type.
#[derive(Debug, Clone, Copy)]
pub struct MaterializationContext<'a> {
    row: &'a ValueBuffer,
    offset: usize,
    entity_type: &'a Arc<EntityType>,
}

impl<'a> MaterializationContext<'a> {
    /// Creates a context for the entity whose first property is at `offset`.
    pub fn new(row: &'a ValueBuffer, offset: usize, entity_type: &'a Arc<EntityType>) -> Self {
        Self {
            row,
            offset,
            entity_type,
        }
    }

    /// Returns the entity type.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        self.entity_type
    }

    /// Returns the value of the property with index `index`.
    pub fn value(&self, index: usize) -> QueryResult<&'a Value> {
        self.row.get(self.offset + index).ok_or_else(|| {
            CoreError::data_reader(format!(
                "row of {} values has no value for {} property {} at offset {}",
                self.row.len(),
                self.entity_type.name(),
                index,
                self.offset
            ))
            .into()
        })
    }
}

/// Builds entity instances from rows.
pub trait EntityMaterializerSource: fmt::Debug + Send + Sync {
    /// Returns the property values of the entity described by `context`, in
    /// property order.
    fn materialize(&self, context: &MaterializationContext<'_>) -> QueryResult<Vec<Value>>;
}

/// Copies property values out of the row, checking types and nullability.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntityMaterializerSource;

impl EntityMaterializerSource for DefaultEntityMaterializerSource {
    fn materialize(&self, context: &MaterializationContext<'_>) -> QueryResult<Vec<Value>> {
        let entity_type = context.entity_type();
        let mut values = Vec::with_capacity(entity_type.property_count());
        for property in entity_type.properties() {
            let value = context.value(property.index())?;
            match value.scalar_type() {
                None if !property.is_nullable() => {
                    return Err(CoreError::type_mismatch(
                        format!("non-null {}", property.scalar_type()),
                        format!("null for {}.{}", entity_type.name(), property.name()),
                    )
                    .into())
                }
                Some(ty) if ty != property.scalar_type() => {
                    return Err(CoreError::type_mismatch(
                        property.scalar_type().to_string(),
                        format!("{ty} for {}.{}", entity_type.name(), property.name()),
                    )
                    .into())
                }
                _ => values.push(value.clone()),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use entiorm_core::{Property, ScalarType};

    fn blog() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Name", ScalarType::Text).nullable())
            .build()
            .unwrap()
    }

    #[test]
    fn reads_values_at_offset() {
        let et = blog();
        let row = ValueBuffer::new(vec![Value::from("x"), Value::Integer(4), Value::Null]);
        let values = DefaultEntityMaterializerSource
            .materialize(&MaterializationContext::new(&row, 1, &et))
            .unwrap();
        assert_eq!(values, vec![Value::Integer(4), Value::Null]);
    }

    #[test]
    fn rejects_wrong_types_and_null_required_values() {
        let et = blog();
        let wrong = ValueBuffer::new(vec![Value::from("x"), Value::Null]);
        let null = ValueBuffer::new(vec![Value::Null, Value::Null]);
        for row in [wrong, null] {
            let err = DefaultEntityMaterializerSource
                .materialize(&MaterializationContext::new(&row, 0, &et))
                .unwrap_err();
            assert!(matches!(err, QueryError::Core(CoreError::TypeMismatch { .. })));
        }
    }

    #[test]
    fn object_fields_by_name() {
        let object = Materialized::Object {
            type_name: "Anon".into(),
            fields: vec![
                ("A".into(), Materialized::Scalar(Value::Integer(1))),
                ("B".into(), Materialized::Null),
            ],
        };
        assert_eq!(object.field("A").and_then(Materialized::as_scalar), Some(&Value::Integer(1)));
        assert!(object.field("B").unwrap().is_null());
        assert_eq!(object.to_string(), "Anon { A = 1, B = null }");
    }
}
