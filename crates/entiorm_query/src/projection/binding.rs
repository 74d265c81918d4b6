//! Projection bindings and mappings.

use crate::error::{QueryError, QueryResult};
use crate::expression::{ExprRef, ExprType, MemberIdentity};
use crate::projection::ProjectionMember;
use entiorm_core::EntityType;
use std::sync::Arc;

/// Placeholder for a value resolved later through the owning query
/// expression's projection mapping. It is never evaluated directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectionBindingExpression {
    member: ProjectionMember,
    ty: ExprType,
}

impl ProjectionBindingExpression {
    /// Creates a binding.
    pub fn new(member: ProjectionMember, ty: ExprType) -> Self {
        Self { member, ty }
    }

    /// Returns the bound member.
    pub fn member(&self) -> &ProjectionMember {
        &self.member
    }

    /// Returns the result type.
    pub fn ty(&self) -> &ExprType {
        &self.ty
    }
}

/// Where a projection member lives in the physical row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionIndex {
    /// An entity whose property values start at `start`.
    EntityValues {
        /// Position of the entity's first property.
        start: usize,
        /// Entity type.
        entity_type: Arc<EntityType>,
    },
    /// A single value.
    Slot(usize),
}

/// Ordered map from projection member to the expression producing it.
///
/// Inserting an existing member replaces its expression in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionMapping {
    entries: Vec<(ProjectionMember, ExprRef)>,
}

impl ProjectionMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mapping with a single root entry.
    pub fn root(expression: ExprRef) -> Self {
        let mut mapping = Self::new();
        mapping.insert(ProjectionMember::new(), expression);
        mapping
    }

    /// Inserts or replaces the expression for a member.
    pub fn insert(&mut self, member: ProjectionMember, expression: ExprRef) {
        match self.entries.iter_mut().find(|(m, _)| *m == member) {
            Some(entry) => entry.1 = expression,
            None => self.entries.push((member, expression)),
        }
    }

    /// Returns the expression for a member.
    pub fn get(&self, member: &ProjectionMember) -> Option<&ExprRef> {
        self.entries
            .iter()
            .find(|(m, _)| m == member)
            .map(|(_, e)| e)
    }

    /// Returns the expression for a member or a translation error.
    pub fn require(&self, member: &ProjectionMember) -> QueryResult<&ExprRef> {
        self.get(member).ok_or_else(|| {
            QueryError::translation(
                format!("ProjectionBinding({member})"),
                "member is not part of the projection mapping",
            )
        })
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProjectionMember, &ExprRef)> {
        self.entries.iter().map(|(m, e)| (m, e))
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a mapping with `member` prepended to every key.
    #[must_use]
    pub fn prepend(&self, member: &MemberIdentity) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(m, e)| (m.prepend(member.clone()), e.clone()))
                .collect(),
        }
    }

    /// Rewrites every expression with `f`.
    pub fn try_map(&self, mut f: impl FnMut(&ExprRef) -> QueryResult<ExprRef>) -> QueryResult<Self> {
        Ok(Self {
            entries: self
                .entries
                .iter()
                .map(|(m, e)| Ok((m.clone(), f(e)?)))
                .collect::<QueryResult<_>>()?,
        })
    }
}

impl FromIterator<(ProjectionMember, ExprRef)> for ProjectionMapping {
    fn from_iter<T: IntoIterator<Item = (ProjectionMember, ExprRef)>>(iter: T) -> Self {
        let mut mapping = Self::new();
        for (member, expression) in iter {
            mapping.insert(member, expression);
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;

    #[test]
    fn insert_replaces_existing_member() {
        let a = ProjectionMember::new().add_member(MemberIdentity::new("Anon", "A"));
        let mut mapping = ProjectionMapping::new();
        mapping.insert(a.clone(), Expression::constant(1));
        mapping.insert(a.clone(), Expression::constant(2));
        assert_eq!(mapping.len(), 1);
        assert_eq!(
            mapping.get(&a).and_then(|e| e.as_constant()).and_then(|v| v.as_integer()),
            Some(2)
        );
    }

    #[test]
    fn prepend_nests_every_key() {
        let mapping = ProjectionMapping::root(Expression::constant(1));
        let outer = mapping.prepend(&MemberIdentity::outer());
        let key = ProjectionMember::new().add_member(MemberIdentity::outer());
        assert!(outer.get(&key).is_some());
        assert!(outer.get(&ProjectionMember::new()).is_none());
        assert!(outer.require(&ProjectionMember::new()).is_err());
    }
}
