//! Property metadata.

use crate::value::ScalarType;
use serde::{Deserialize, Serialize};

/// When the store generates a value for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValueGenerated {
    /// The value always comes from the client.
    #[default]
    Never,
    /// The store generates the value on insert (identity columns, defaults).
    OnAdd,
    /// The store generates the value on insert and update (computed columns,
    /// row versions).
    OnAddOrUpdate,
}

/// A mapped property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    name: String,
    #[serde(default)]
    index: usize,
    scalar_type: ScalarType,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    column_name: Option<String>,
    #[serde(default)]
    store_type: Option<String>,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    foreign_key: bool,
    #[serde(default)]
    concurrency_token: bool,
    #[serde(default)]
    value_generated: ValueGenerated,
}

impl Property {
    /// Creates a non-nullable, client-valued property.
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            index: 0,
            scalar_type,
            nullable: false,
            column_name: None,
            store_type: None,
            primary_key: false,
            foreign_key: false,
            concurrency_token: false,
            value_generated: ValueGenerated::Never,
        }
    }

    /// Marks the property as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the property as part of the primary key.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the property as part of a foreign key.
    #[must_use]
    pub fn foreign_key(mut self) -> Self {
        self.foreign_key = true;
        self
    }

    /// Marks the property as an optimistic concurrency token.
    #[must_use]
    pub fn concurrency_token(mut self) -> Self {
        self.concurrency_token = true;
        self
    }

    /// Sets the store-generation classification.
    #[must_use]
    pub fn value_generated(mut self, value: ValueGenerated) -> Self {
        self.value_generated = value;
        self
    }

    /// Shorthand for an identity-style key: `key()` + `ValueGenerated::OnAdd`.
    #[must_use]
    pub fn identity(self) -> Self {
        self.key().value_generated(ValueGenerated::OnAdd)
    }

    /// Shorthand for a row-version token: concurrency token generated on
    /// add or update.
    #[must_use]
    pub fn row_version(self) -> Self {
        self.concurrency_token()
            .value_generated(ValueGenerated::OnAddOrUpdate)
    }

    /// Maps the property to a column with a different name.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = Some(name.into());
        self
    }

    /// Sets the provider store type (e.g. `nvarchar(max)`).
    #[must_use]
    pub fn store_type(mut self, store_type: impl Into<String>) -> Self {
        self.store_type = Some(store_type.into());
        self
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Returns the property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the position of the property within its entity type.
    ///
    /// This is also the offset of the property's value in an entity's
    /// value buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    /// Returns true if the property accepts nulls.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns the mapped column name.
    pub fn column_name(&self) -> &str {
        self.column_name.as_deref().unwrap_or(&self.name)
    }

    /// Returns the provider store type, if configured.
    pub fn store_type_name(&self) -> Option<&str> {
        self.store_type.as_deref()
    }

    /// Returns true if the property is part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Returns true if the property is part of a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key
    }

    /// Returns true if the property is a concurrency token.
    pub fn is_concurrency_token(&self) -> bool {
        self.concurrency_token
    }

    /// Returns the store-generation classification.
    pub fn generated(&self) -> ValueGenerated {
        self.value_generated
    }
}
