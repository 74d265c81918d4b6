//! One property's role within a modification command.

use entiorm_core::{EntityState, Property, UpdateEntry, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Hands out batch-unique parameter names (`p0`, `p1`, ...).
#[derive(Debug, Default)]
pub struct ParameterNameGenerator {
    next: usize,
}

impl ParameterNameGenerator {
    /// Creates a generator starting at `p0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused name.
    pub fn generate_next(&mut self) -> String {
        let name = format!("p{}", self.next);
        self.next += 1;
        name
    }
}

/// Which roles a column plays in its command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// The store generates the value; it is read back after the statement.
    pub read: bool,
    /// The client value is written to the store.
    pub write: bool,
    /// The column is part of the primary key.
    pub key: bool,
    /// The column's original value is part of the WHERE clause.
    pub condition: bool,
}

impl ColumnFlags {
    /// Classifies a property for an entry in `state`.
    ///
    /// Returns `None` when the property takes no part in the statement.
    pub fn classify(entry: &dyn UpdateEntry, property: &Property, state: EntityState) -> Option<Self> {
        let key = property.is_primary_key();
        let flags = match state {
            EntityState::Added => {
                let read = entry.is_store_generated(property);
                Self {
                    read,
                    write: !read,
                    key,
                    condition: false,
                }
            }
            EntityState::Modified => Self {
                read: entry.is_store_generated(property),
                write: !key && entry.is_modified(property),
                key,
                condition: key || property.is_concurrency_token(),
            },
            EntityState::Deleted => Self {
                read: false,
                write: false,
                key,
                condition: key || property.is_concurrency_token(),
            },
            EntityState::Unchanged | EntityState::Detached => return None,
        };
        (flags.read || flags.write || flags.key || flags.condition).then_some(flags)
    }
}

/// A property of one tracked entry, with its flags and parameter names.
///
/// Parameter names are assigned on first request and never change, so the
/// command text and the parameter list built from it always agree.
pub struct ColumnModification {
    entry: Arc<dyn UpdateEntry>,
    property: Property,
    flags: ColumnFlags,
    sharing: Vec<(Arc<dyn UpdateEntry>, Property)>,
    parameter_name: OnceLock<String>,
    original_parameter_name: OnceLock<String>,
    output_parameter_name: OnceLock<String>,
}

impl ColumnModification {
    /// Creates a column modification for `property` of `entry`.
    pub fn new(entry: Arc<dyn UpdateEntry>, property: Property, flags: ColumnFlags) -> Self {
        Self {
            entry,
            property,
            flags,
            sharing: Vec::new(),
            parameter_name: OnceLock::new(),
            original_parameter_name: OnceLock::new(),
            output_parameter_name: OnceLock::new(),
        }
    }

    /// Returns the owning entry.
    pub fn entry(&self) -> &Arc<dyn UpdateEntry> {
        &self.entry
    }

    /// Records another entry mapping the same column of the same row.
    ///
    /// Values read back from the store are staged on it as well.
    pub fn share_with(&mut self, entry: Arc<dyn UpdateEntry>, property: Property) {
        self.sharing.push((entry, property));
    }

    /// Returns every entry that maps this column, owner first.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<dyn UpdateEntry>> {
        std::iter::once(&self.entry).chain(self.sharing.iter().map(|(entry, _)| entry))
    }

    /// Returns the property.
    pub fn property(&self) -> &Property {
        &self.property
    }

    /// Returns the column name.
    pub fn column_name(&self) -> &str {
        self.property.column_name()
    }

    /// Returns the column flags.
    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    /// True when the value is read back from the store.
    pub fn is_read(&self) -> bool {
        self.flags.read
    }

    /// True when the client value is written.
    pub fn is_write(&self) -> bool {
        self.flags.write
    }

    /// True for primary key columns.
    pub fn is_key(&self) -> bool {
        self.flags.key
    }

    /// True when the original value is part of the WHERE clause.
    pub fn is_condition(&self) -> bool {
        self.flags.condition
    }

    /// Returns the entry's current value.
    pub fn value(&self) -> Value {
        self.entry.current_value(&self.property)
    }

    /// Returns the entry's original value.
    pub fn original_value(&self) -> Value {
        self.entry.original_value(&self.property)
    }

    /// Stages a value read back from the store on every entry mapping the
    /// column.
    pub fn set_value(&self, value: Value) {
        for (entry, property) in &self.sharing {
            entry.set_store_generated_value(property, value.clone());
        }
        self.entry.set_store_generated_value(&self.property, value);
    }

    /// True when the current value travels as a parameter.
    pub fn uses_current_value_parameter(&self) -> bool {
        self.flags.write
    }

    /// True when the original value travels as a parameter.
    ///
    /// A null original value is matched with `IS NULL` instead.
    pub fn uses_original_value_parameter(&self) -> bool {
        self.flags.condition && !self.original_value().is_null()
    }

    /// Number of parameters this column contributes.
    pub fn parameter_count(&self) -> usize {
        usize::from(self.uses_current_value_parameter())
            + usize::from(self.uses_original_value_parameter())
    }

    /// Returns the current-value parameter name, assigning it on first use.
    pub fn parameter_name(&self, names: &mut ParameterNameGenerator) -> &str {
        self.parameter_name.get_or_init(|| names.generate_next())
    }

    /// Returns the original-value parameter name, assigning it on first use.
    pub fn original_parameter_name(&self, names: &mut ParameterNameGenerator) -> &str {
        self.original_parameter_name
            .get_or_init(|| names.generate_next())
    }

    /// Returns the output parameter name, assigning it on first use.
    pub fn output_parameter_name(&self, names: &mut ParameterNameGenerator) -> &str {
        self.output_parameter_name.get_or_init(|| names.generate_next())
    }
}

impl fmt::Debug for ColumnModification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnModification")
            .field("column", &self.column_name())
            .field("flags", &self.flags)
            .field("shared_by", &self.sharing.len())
            .field("parameter_name", &self.parameter_name.get())
            .field("original_parameter_name", &self.original_parameter_name.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::{EntityEntry, EntityType, ScalarType};

    fn post_type() -> Arc<EntityType> {
        EntityType::builder("Post")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Title", ScalarType::Text))
            .property(Property::new("Version", ScalarType::Bytes).row_version())
            .build()
            .unwrap()
    }

    fn flags_for(entry: &EntityEntry, name: &str) -> Option<ColumnFlags> {
        let property = entry.entity_type().property(name).unwrap();
        ColumnFlags::classify(entry, property, entry.state())
    }

    #[test]
    fn added_entries_read_generated_columns_and_write_the_rest() {
        let entry = EntityEntry::with_values(
            post_type(),
            [("Title", Value::from("hello"))],
            EntityState::Added,
        )
        .unwrap();

        let id = flags_for(&entry, "Id").unwrap();
        assert!(id.read && id.key && !id.write && !id.condition);
        let title = flags_for(&entry, "Title").unwrap();
        assert!(title.write && !title.read);
        assert!(flags_for(&entry, "Version").unwrap().read);
    }

    #[test]
    fn modified_entries_use_keys_and_tokens_as_conditions() {
        let entry = EntityEntry::new(
            post_type(),
            vec![1.into(), "old".into(), Value::Bytes(vec![1])],
            EntityState::Unchanged,
        );
        entry.set_value("Title", "new".into()).unwrap();

        let id = flags_for(&entry, "Id").unwrap();
        assert!(id.key && id.condition && !id.write);
        let title = flags_for(&entry, "Title").unwrap();
        assert!(title.write && !title.condition);
        let version = flags_for(&entry, "Version").unwrap();
        assert!(version.condition && version.read && !version.write);
    }

    #[test]
    fn deleted_entries_only_carry_conditions() {
        let entry = EntityEntry::new(
            post_type(),
            vec![1.into(), "old".into(), Value::Bytes(vec![1])],
            EntityState::Deleted,
        );
        assert!(flags_for(&entry, "Title").is_none());
        assert!(flags_for(&entry, "Version").unwrap().condition);
        assert!(flags_for(&entry, "Id").unwrap().condition);
    }

    #[test]
    fn parameter_names_are_assigned_once() {
        let entry: Arc<dyn UpdateEntry> = Arc::new(EntityEntry::with_values(
            post_type(),
            [("Title", Value::from("x"))],
            EntityState::Added,
        )
        .unwrap());
        let property = entry.entity_type().property("Title").unwrap().clone();
        let column = ColumnModification::new(
            entry,
            property,
            ColumnFlags {
                write: true,
                ..ColumnFlags::default()
            },
        );

        let mut names = ParameterNameGenerator::new();
        assert_eq!(column.parameter_name(&mut names), "p0");
        assert_eq!(column.parameter_name(&mut names), "p0");
        assert_eq!(column.original_parameter_name(&mut names), "p1");
        assert_eq!(column.output_parameter_name(&mut names), "p2");
        assert_eq!(names.generate_next(), "p3");
        assert_eq!(column.parameter_count(), 1);
    }

    #[test]
    fn null_original_values_need_no_parameter() {
        let entry: Arc<dyn UpdateEntry> = Arc::new(EntityEntry::new(
            post_type(),
            vec![1.into(), "t".into(), Value::Null],
            EntityState::Deleted,
        ));
        let property = entry.entity_type().property("Version").unwrap().clone();
        let flags = ColumnFlags::classify(entry.as_ref(), &property, EntityState::Deleted).unwrap();
        let column = ColumnModification::new(entry, property, flags);
        assert!(!column.uses_original_value_parameter());
        assert_eq!(column.parameter_count(), 0);
    }
}
