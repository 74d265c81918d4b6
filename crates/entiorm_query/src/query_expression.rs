//! The provider query expression contract.

use crate::error::{QueryError, QueryResult};
use crate::expression::{ExprRef, Expression, ExtensionExpression, MemberIdentity};
use crate::in_memory::InMemoryQueryExpression;
use crate::projection::{ProjectionIndex, ProjectionMapping, ProjectionMember};
use crate::relational::SelectExpression;
use std::fmt;

/// A provider's intermediate representation of one queryable source.
///
/// It owns an ordered list of value slots (the physical row layout) and a
/// mapping from projection member to either an entity projection or a single
/// value expression. The two always describe the same layout.
pub trait QueryExpression: fmt::Debug + fmt::Display {
    /// Returns the expression currently mapped to `member`.
    fn get_mapped_projection(&self, member: &ProjectionMember) -> QueryResult<ExprRef>;

    /// Returns the current projection mapping.
    fn projection_mapping(&self) -> &ProjectionMapping;

    /// Replaces the slot list and the projection mapping together.
    ///
    /// `mapping` values are expressions over the current row (as returned by
    /// [`QueryExpression::get_mapped_projection`] or produced by the
    /// provider's translator).
    fn apply_projection(&mut self, mapping: ProjectionMapping);

    /// Returns where `member` lives in the physical row.
    fn projection_index(&self, member: &ProjectionMember) -> QueryResult<ProjectionIndex>;

    /// Returns the number of values in each physical row.
    fn slot_count(&self) -> usize;
}

/// The closed set of provider query expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpressionKind {
    /// In-memory provider.
    InMemory(InMemoryQueryExpression),
    /// Relational provider.
    Select(SelectExpression),
}

impl QueryExpressionKind {
    fn inner(&self) -> &dyn QueryExpression {
        match self {
            Self::InMemory(q) => q,
            Self::Select(q) => q,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn QueryExpression {
        match self {
            Self::InMemory(q) => q,
            Self::Select(q) => q,
        }
    }
}

impl QueryExpression for QueryExpressionKind {
    fn get_mapped_projection(&self, member: &ProjectionMember) -> QueryResult<ExprRef> {
        self.inner().get_mapped_projection(member)
    }

    fn projection_mapping(&self) -> &ProjectionMapping {
        self.inner().projection_mapping()
    }

    fn apply_projection(&mut self, mapping: ProjectionMapping) {
        self.inner_mut().apply_projection(mapping);
    }

    fn projection_index(&self, member: &ProjectionMember) -> QueryResult<ProjectionIndex> {
        self.inner().projection_index(member)
    }

    fn slot_count(&self) -> usize {
        self.inner().slot_count()
    }
}

impl fmt::Display for QueryExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner(), f)
    }
}

/// One sort key of an ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingExpression {
    /// Sort key over the current row.
    pub expression: ExprRef,
    /// Ascending when set.
    pub ascending: bool,
}

impl OrderingExpression {
    /// Creates an ordering.
    pub fn new(expression: ExprRef, ascending: bool) -> Self {
        Self {
            expression,
            ascending,
        }
    }
}

impl fmt::Display for OrderingExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.expression,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

/// Physical layout derived from a projection mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ProjectionLayout {
    /// Value expressions, one per physical slot.
    pub slots: Vec<ExprRef>,
    /// Where each member starts.
    pub indexes: Vec<(ProjectionMember, ProjectionIndex)>,
}

impl ProjectionLayout {
    /// Flattens a mapping: entity projections contribute one slot per
    /// property, everything else one slot.
    pub fn from_mapping(mapping: &ProjectionMapping) -> Self {
        let mut layout = Self::default();
        for (member, expression) in mapping.iter() {
            match expression.as_ref() {
                Expression::Extension(ExtensionExpression::EntityProjection(projection)) => {
                    layout.indexes.push((
                        member.clone(),
                        ProjectionIndex::EntityValues {
                            start: layout.slots.len(),
                            entity_type: projection.entity_type.clone(),
                        },
                    ));
                    layout.slots.extend(projection.properties.iter().cloned());
                }
                _ => {
                    layout
                        .indexes
                        .push((member.clone(), ProjectionIndex::Slot(layout.slots.len())));
                    layout.slots.push(expression.clone());
                }
            }
        }
        layout
    }

    /// Returns the index recorded for `member`.
    pub fn index_of(&self, member: &ProjectionMember) -> QueryResult<ProjectionIndex> {
        self.indexes
            .iter()
            .find(|(m, _)| m == member)
            .map(|(_, i)| i.clone())
            .ok_or_else(|| {
                QueryError::translation(
                    format!("ProjectionBinding({member})"),
                    "member has no position in the projection",
                )
            })
    }

    /// Appends another layout after this one, nesting its members under
    /// `inner` and shifting its positions by the current width. This layout's
    /// members are nested under `outer`.
    pub fn join(
        &self,
        other: &Self,
        outer: &MemberIdentity,
        inner: &MemberIdentity,
        other_slots: Vec<ExprRef>,
    ) -> Self {
        let width = self.slots.len();
        let mut indexes: Vec<_> = self
            .indexes
            .iter()
            .map(|(m, i)| (m.prepend(outer.clone()), i.clone()))
            .collect();
        indexes.extend(other.indexes.iter().map(|(m, i)| {
            let shifted = match i {
                ProjectionIndex::Slot(s) => ProjectionIndex::Slot(s + width),
                ProjectionIndex::EntityValues { start, entity_type } => {
                    ProjectionIndex::EntityValues {
                        start: start + width,
                        entity_type: entity_type.clone(),
                    }
                }
            };
            (m.prepend(inner.clone()), shifted)
        }));
        let mut slots = self.slots.clone();
        slots.extend(other_slots);
        Self { slots, indexes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::EntityProjectionExpression;
    use entiorm_core::{EntityType, Property, ScalarType};

    #[test]
    fn entity_projection_occupies_one_slot_per_property() {
        let et = EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap();
        let entity = EntityProjectionExpression::new(
            et,
            vec![Expression::constant(1), Expression::constant("n")],
            false,
        )
        .into_expression();

        let a = ProjectionMember::new().add_member(MemberIdentity::new("Anon", "A"));
        let e = ProjectionMember::new().add_member(MemberIdentity::new("Anon", "E"));
        let mut mapping = ProjectionMapping::new();
        mapping.insert(a.clone(), Expression::constant(true));
        mapping.insert(e.clone(), entity);

        let layout = ProjectionLayout::from_mapping(&mapping);
        assert_eq!(layout.slots.len(), 3);
        assert_eq!(layout.index_of(&a).unwrap(), ProjectionIndex::Slot(0));
        assert!(matches!(
            layout.index_of(&e).unwrap(),
            ProjectionIndex::EntityValues { start: 1, .. }
        ));

        let joined = layout.join(
            &layout,
            &MemberIdentity::outer(),
            &MemberIdentity::inner(),
            layout.slots.clone(),
        );
        assert_eq!(joined.slots.len(), 6);
        assert_eq!(
            joined.index_of(&a.prepend(MemberIdentity::inner())).unwrap(),
            ProjectionIndex::Slot(3)
        );
    }
}
