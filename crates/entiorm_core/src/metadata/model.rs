//! The model: a set of entity types.

use crate::error::{CoreError, CoreResult};
use crate::metadata::EntityType;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A set of entity types keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Model {
    entity_types: BTreeMap<String, Arc<EntityType>>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity type, replacing any type with the same name.
    pub fn add(&mut self, entity_type: Arc<EntityType>) {
        self.entity_types
            .insert(entity_type.name().to_string(), entity_type);
    }

    /// Finds an entity type by name.
    pub fn find_entity_type(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.entity_types.get(name)
    }

    /// Finds an entity type by name, failing if it does not exist.
    pub fn entity_type(&self, name: &str) -> CoreResult<&Arc<EntityType>> {
        self.find_entity_type(name)
            .ok_or_else(|| CoreError::EntityTypeNotFound {
                name: name.to_string(),
            })
    }

    /// Iterates entity types in name order.
    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entity_types.values()
    }

    /// Serializes the model to JSON.
    pub fn to_json(&self) -> CoreResult<String> {
        let types: Vec<&EntityType> = self.entity_types.values().map(|e| e.as_ref()).collect();
        Ok(serde_json::to_string_pretty(&types)?)
    }

    /// Loads a model from JSON produced by [`Model::to_json`], validating
    /// every entity type.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let types: Vec<EntityType> = serde_json::from_str(json)?;
        let mut model = Model::new();
        for entity_type in types {
            model.add(Arc::new(entity_type.validate()?));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Property;
    use crate::value::ScalarType;

    #[test]
    fn json_snapshot_roundtrip_keeps_indexes() {
        let mut model = Model::new();
        model.add(
            EntityType::builder("Blog")
                .table("Blogs")
                .property(Property::new("Id", ScalarType::Integer).identity())
                .property(Property::new("Name", ScalarType::Text))
                .build()
                .unwrap(),
        );

        let json = model.to_json().unwrap();
        let loaded = Model::from_json(&json).unwrap();
        let blog = loaded.entity_type("Blog").unwrap();
        assert_eq!(blog.property("Name").unwrap().index(), 1);
        assert!(blog.property("Id").unwrap().is_primary_key());
    }

    #[test]
    fn unknown_entity_type() {
        let model = Model::new();
        assert!(matches!(
            model.entity_type("Nope"),
            Err(CoreError::EntityTypeNotFound { .. })
        ));
    }

    #[test]
    fn invalid_json_is_a_serialization_error() {
        assert!(matches!(
            Model::from_json("{"),
            Err(CoreError::Serialization(_))
        ));
    }
}
