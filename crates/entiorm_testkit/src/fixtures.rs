//! Test fixtures.
//!
//! A two-table blogging model: `Blog` (identity key, name, nullable rating)
//! and `Post` (identity key, blog foreign key, title, row version).

use entiorm_core::{
    EntityEntry, EntityState, EntityType, Model, Property, ScalarType, StateManager, Value,
};
use std::sync::Arc;

/// The `Blog` entity type, mapped to the `Blogs` table.
///
/// Properties in index order: `Id`, `Name`, `Rating`.
pub fn blog_type() -> Arc<EntityType> {
    EntityType::builder("Blog")
        .table("Blogs")
        .property(Property::new("Id", ScalarType::Integer).identity())
        .property(Property::new("Name", ScalarType::Text))
        .property(Property::new("Rating", ScalarType::Integer).nullable())
        .build()
        .expect("Blog fixture is valid")
}

/// The `Post` entity type, mapped to `dbo.Posts`.
///
/// Properties in index order: `Id`, `BlogId`, `Title`, `Version`.
pub fn post_type() -> Arc<EntityType> {
    EntityType::builder("Post")
        .table("Posts")
        .schema("dbo")
        .property(Property::new("Id", ScalarType::Integer).identity())
        .property(Property::new("BlogId", ScalarType::Integer).foreign_key())
        .property(Property::new("Title", ScalarType::Text))
        .property(Property::new("Version", ScalarType::Bytes).row_version())
        .build()
        .expect("Post fixture is valid")
}

/// A tag with a client-assigned key and no store-generated values.
///
/// Properties in index order: `Id`, `Label`.
pub fn tag_type() -> Arc<EntityType> {
    EntityType::builder("Tag")
        .table("Tags")
        .property(Property::new("Id", ScalarType::Integer).key())
        .property(Property::new("Label", ScalarType::Text))
        .build()
        .expect("Tag fixture is valid")
}

/// A model holding [`blog_type`], [`post_type`] and [`tag_type`].
pub fn sample_model() -> Model {
    let mut model = Model::new();
    model.add(blog_type());
    model.add(post_type());
    model.add(tag_type());
    model
}

/// Seed rows for `Blog`.
///
/// | Id | Name    | Rating |
/// |----|---------|--------|
/// | 1  | rust    | 5      |
/// | 2  | cooking | null   |
/// | 3  | travel  | 3      |
/// | 4  | music   | 5      |
pub fn blog_rows() -> Vec<Vec<Value>> {
    vec![
        vec![1.into(), "rust".into(), 5.into()],
        vec![2.into(), "cooking".into(), Value::Null],
        vec![3.into(), "travel".into(), 3.into()],
        vec![4.into(), "music".into(), 5.into()],
    ]
}

/// Seed rows for `Post`; blog 2 has no posts.
pub fn post_rows() -> Vec<Vec<Value>> {
    vec![
        vec![10.into(), 1.into(), "ownership".into(), vec![1u8].into()],
        vec![11.into(), 1.into(), "lifetimes".into(), vec![2u8].into()],
        vec![12.into(), 3.into(), "lisbon".into(), vec![3u8].into()],
        vec![13.into(), 4.into(), "jazz".into(), vec![4u8].into()],
    ]
}

/// An entry in `state` for `entity_type`, tracked by `state_manager`.
pub fn tracked_entry<'a>(
    state_manager: &StateManager,
    entity_type: &Arc<EntityType>,
    values: impl IntoIterator<Item = (&'a str, Value)>,
    state: EntityState,
) -> Arc<EntityEntry> {
    let entry = Arc::new(
        EntityEntry::with_values(entity_type.clone(), values, state)
            .expect("fixture values name mapped properties"),
    );
    state_manager.track(entry.clone());
    entry
}

/// An untracked entry in `state`.
pub fn entry<'a>(
    entity_type: &Arc<EntityType>,
    values: impl IntoIterator<Item = (&'a str, Value)>,
    state: EntityState,
) -> Arc<EntityEntry> {
    Arc::new(
        EntityEntry::with_values(entity_type.clone(), values, state)
            .expect("fixture values name mapped properties"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_rows_match_property_counts() {
        let blog = blog_type();
        let post = post_type();
        assert!(blog_rows().iter().all(|r| r.len() == blog.property_count()));
        assert!(post_rows().iter().all(|r| r.len() == post.property_count()));
    }

    #[test]
    fn model_resolves_every_fixture() {
        let model = sample_model();
        for name in ["Blog", "Post", "Tag"] {
            assert!(model.find_entity_type(name).is_some(), "{name} missing");
        }
    }
}
