//! Entity type metadata.

use crate::error::{CoreError, CoreResult};
use crate::metadata::Property;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// An entity type mapped to a table.
///
/// Properties are ordered; a property's [`Property::index`] is its position
/// in [`EntityType::properties`] and in every value buffer that carries the
/// entity's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    name: String,
    table_name: String,
    #[serde(default)]
    schema: Option<String>,
    properties: Vec<Property>,
}

impl EntityType {
    /// Starts building an entity type.
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder::new(name)
    }

    /// Returns the entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the mapped table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the mapped schema, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Returns all properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Returns the number of properties.
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Finds a property by name.
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// Finds a property by name, failing if it does not exist.
    pub fn property(&self, name: &str) -> CoreResult<&Property> {
        self.find_property(name)
            .ok_or_else(|| CoreError::PropertyNotFound {
                entity_type: self.name.clone(),
                property: name.to_string(),
            })
    }

    /// Returns the primary key properties in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_primary_key())
    }

    pub(crate) fn validate(self) -> CoreResult<Self> {
        if self.table_name.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "entity type '{}' has an empty table name",
                self.name
            )));
        }
        if self.primary_key().next().is_none() {
            return Err(CoreError::invalid_argument(format!(
                "entity type '{}' has no primary key",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for property in &self.properties {
            if !seen.insert(property.name()) {
                return Err(CoreError::invalid_argument(format!(
                    "entity type '{}' declares property '{}' twice",
                    self.name,
                    property.name()
                )));
            }
        }
        let properties = self
            .properties
            .into_iter()
            .enumerate()
            .map(|(i, p)| p.with_index(i))
            .collect();
        Ok(Self {
            properties,
            ..self
        })
    }
}

/// Builder for [`EntityType`].
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    table_name: Option<String>,
    schema: Option<String>,
    properties: Vec<Property>,
}

impl EntityTypeBuilder {
    /// Creates a builder; the table name defaults to the entity name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            schema: None,
            properties: Vec::new(),
        }
    }

    /// Sets the table name.
    #[must_use]
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Sets the schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Appends a property.
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Validates and builds the entity type.
    pub fn build(self) -> CoreResult<Arc<EntityType>> {
        let table_name = self.table_name.unwrap_or_else(|| self.name.clone());
        EntityType {
            name: self.name,
            table_name,
            schema: self.schema,
            properties: self.properties,
        }
        .validate()
        .map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarType;

    fn blog() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text).nullable())
            .build()
            .unwrap()
    }

    #[test]
    fn indexes_follow_declaration_order() {
        let blog = blog();
        assert_eq!(blog.property("Id").unwrap().index(), 0);
        assert_eq!(blog.property("Name").unwrap().index(), 1);
        assert_eq!(blog.table_name(), "Blogs");
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = EntityType::builder("Keyless")
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn duplicate_property_is_rejected() {
        let err = EntityType::builder("Dup")
            .property(Property::new("Id", ScalarType::Integer).key())
            .property(Property::new("Id", ScalarType::Integer))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn unknown_property_lookup() {
        let blog = blog();
        assert!(matches!(
            blog.property("Missing"),
            Err(CoreError::PropertyNotFound { .. })
        ));
    }
}
