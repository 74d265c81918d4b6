//! Query expression of the in-memory provider.

use crate::error::{QueryError, QueryResult};
use crate::expression::{
    EntityProjectionExpression, ExprRef, ExprType, Expression, ExtensionExpression,
    MemberIdentity, ValueBufferRead,
};
use crate::projection::{ProjectionIndex, ProjectionMapping, ProjectionMember};
use crate::query_expression::{OrderingExpression, ProjectionLayout, QueryExpression};
use crate::visitor::map_children;
use entiorm_core::{EntityType, ScalarType};
use std::fmt;
use std::sync::Arc;

/// The operator tree evaluated against an [`InMemoryStore`].
///
/// Every expression inside a node reads from the row produced by that
/// node's source.
///
/// [`InMemoryStore`]: crate::in_memory::InMemoryStore
#[derive(Debug, Clone, PartialEq)]
pub enum ServerQuery {
    /// All rows of a table.
    Table(Arc<EntityType>),
    /// Rows for which `predicate` is true.
    Filter {
        /// Input.
        source: Box<ServerQuery>,
        /// Boolean expression.
        predicate: ExprRef,
    },
    /// Rows rebuilt from `slots`.
    Project {
        /// Input.
        source: Box<ServerQuery>,
        /// One expression per output value.
        slots: Vec<ExprRef>,
    },
    /// Rows sorted by `orderings`, first key most significant.
    OrderBy {
        /// Input.
        source: Box<ServerQuery>,
        /// Sort keys.
        orderings: Vec<OrderingExpression>,
    },
    /// Rows after the first `count`.
    Skip {
        /// Input.
        source: Box<ServerQuery>,
        /// Integer constant or query parameter.
        count: ExprRef,
    },
    /// At most `count` rows.
    Take {
        /// Input.
        source: Box<ServerQuery>,
        /// Integer constant or query parameter.
        count: ExprRef,
    },
    /// Rows with duplicates removed, first occurrence kept.
    Distinct {
        /// Input.
        source: Box<ServerQuery>,
    },
    /// Equi-join on composite keys; output rows are outer values followed by
    /// inner values.
    Join {
        /// Outer input.
        outer: Box<ServerQuery>,
        /// Inner input.
        inner: Box<ServerQuery>,
        /// Key parts over the outer row.
        outer_key: Vec<ExprRef>,
        /// Key parts over the inner row.
        inner_key: Vec<ExprRef>,
        /// Keeps unmatched outer rows, padded with nulls.
        left: bool,
        /// Number of values in an inner row.
        inner_width: usize,
    },
    /// A single row holding the number of input rows.
    Count {
        /// Input.
        source: Box<ServerQuery>,
    },
}

fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for ServerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(et) => write!(f, "Table({})", et.name()),
            Self::Filter { source, predicate } => write!(f, "Filter({source}, {predicate})"),
            Self::Project { source, slots } => {
                write!(f, "Project({source}, [")?;
                list(f, slots)?;
                f.write_str("])")
            }
            Self::OrderBy { source, orderings } => {
                write!(f, "OrderBy({source}, [")?;
                list(f, orderings)?;
                f.write_str("])")
            }
            Self::Skip { source, count } => write!(f, "Skip({source}, {count})"),
            Self::Take { source, count } => write!(f, "Take({source}, {count})"),
            Self::Distinct { source } => write!(f, "Distinct({source})"),
            Self::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                left,
                ..
            } => {
                write!(f, "{}({outer}, {inner}, [", if *left { "LeftJoin" } else { "Join" })?;
                list(f, outer_key)?;
                f.write_str("], [")?;
                list(f, inner_key)?;
                f.write_str("])")
            }
            Self::Count { source } => write!(f, "Count({source})"),
        }
    }
}

/// In-memory query expression: a [`ServerQuery`] plus the projection
/// mapping that describes its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryQueryExpression {
    server_query: ServerQuery,
    mapping: ProjectionMapping,
    layout: ProjectionLayout,
}

impl InMemoryQueryExpression {
    /// Creates a query over all rows of `entity_type`, projecting the entity.
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        let reads = entity_type
            .properties()
            .iter()
            .map(|p| ValueBufferRead::for_property(p.index(), p, false))
            .collect();
        let mapping = ProjectionMapping::root(
            EntityProjectionExpression::new(entity_type.clone(), reads, false).into_expression(),
        );
        let layout = ProjectionLayout::from_mapping(&mapping);
        Self {
            server_query: ServerQuery::Table(entity_type),
            mapping,
            layout,
        }
    }

    /// Returns the operator tree.
    pub fn server_query(&self) -> &ServerQuery {
        &self.server_query
    }

    fn wrap(&mut self, f: impl FnOnce(Box<ServerQuery>) -> ServerQuery) {
        let source = Box::new(self.server_query.clone());
        self.server_query = f(source);
    }

    /// Keeps only rows matching `predicate`.
    pub fn apply_predicate(&mut self, predicate: ExprRef) {
        self.wrap(|source| ServerQuery::Filter { source, predicate });
    }

    /// Sorts by `ordering`; with `append` the key is added to the current
    /// ordering instead of starting a new one.
    pub fn apply_ordering(&mut self, ordering: OrderingExpression, append: bool) -> QueryResult<()> {
        if append {
            return match &mut self.server_query {
                ServerQuery::OrderBy { orderings, .. } => {
                    orderings.push(ordering);
                    Ok(())
                }
                _ => Err(QueryError::translation(
                    ordering.to_string(),
                    "ThenBy must directly follow OrderBy",
                )),
            };
        }
        self.wrap(|source| ServerQuery::OrderBy {
            source,
            orderings: vec![ordering],
        });
        Ok(())
    }

    /// Skips `count` rows.
    pub fn apply_skip(&mut self, count: ExprRef) {
        self.wrap(|source| ServerQuery::Skip { source, count });
    }

    /// Limits to `count` rows.
    pub fn apply_take(&mut self, count: ExprRef) {
        self.wrap(|source| ServerQuery::Take { source, count });
    }

    /// Removes duplicate rows.
    pub fn apply_distinct(&mut self) {
        self.wrap(|source| ServerQuery::Distinct { source });
    }

    /// Replaces the query by the count of its rows.
    pub fn apply_count(&mut self) {
        self.wrap(|source| ServerQuery::Count { source });
        self.mapping = ProjectionMapping::root(ValueBufferRead::expression(
            0,
            ExprType::Scalar(ScalarType::Integer),
            false,
            None,
        ));
        self.layout = ProjectionLayout::from_mapping(&self.mapping);
    }

    /// Joins `inner` on equal keys.
    ///
    /// Current members move under `Outer`, the inner members under `Inner`.
    /// For a left join every inner value becomes nullable.
    pub fn add_join(
        &mut self,
        inner: InMemoryQueryExpression,
        outer_key: Vec<ExprRef>,
        inner_key: Vec<ExprRef>,
        left: bool,
    ) {
        let width = self.layout.slots.len();
        let inner_width = inner.layout.slots.len();
        let inner_slots = inner
            .layout
            .slots
            .iter()
            .map(|s| shift_reads(s, width, left))
            .collect();
        self.layout = self.layout.join(
            &inner.layout,
            &MemberIdentity::outer(),
            &MemberIdentity::inner(),
            inner_slots,
        );

        let mut mapping = self.mapping.prepend(&MemberIdentity::outer());
        for (member, expression) in inner.mapping.iter() {
            mapping.insert(
                member.prepend(MemberIdentity::inner()),
                shift_reads(expression, width, left),
            );
        }
        self.mapping = mapping;

        self.server_query = ServerQuery::Join {
            outer: Box::new(self.server_query.clone()),
            inner: Box::new(inner.server_query),
            outer_key,
            inner_key,
            left,
            inner_width,
        };
    }
}

/// Moves every row read in `expr` by `shift`, marking it nullable when
/// `make_nullable` is set.
fn shift_reads(expr: &ExprRef, shift: usize, make_nullable: bool) -> ExprRef {
    match expr.as_ref() {
        Expression::Extension(ExtensionExpression::ValueBufferRead(_)) => {
            ValueBufferRead::remap(expr, shift, make_nullable)
        }
        Expression::Extension(ExtensionExpression::EntityProjection(projection)) => {
            let mut projection = projection.clone();
            projection.properties = projection
                .properties
                .iter()
                .map(|p| shift_reads(p, shift, make_nullable))
                .collect();
            projection.nullable |= make_nullable;
            projection.into_expression()
        }
        _ => map_children(expr, |child| shift_reads(child, shift, make_nullable)),
    }
}

/// Whether evaluating `expr` can produce null under client semantics.
pub(crate) fn may_be_null(expr: &Expression) -> bool {
    match expr {
        Expression::Constant(_) => expr.is_null_constant(),
        Expression::QueryParameter { .. } => true,
        Expression::Extension(ExtensionExpression::ValueBufferRead(read)) => read.nullable,
        Expression::Extension(ExtensionExpression::In { .. })
        | Expression::Extension(ExtensionExpression::IsNull { .. }) => false,
        Expression::Binary { op, .. } if op.is_comparison() => false,
        _ => crate::visitor::children(expr)
            .into_iter()
            .any(|child| may_be_null(child)),
    }
}

impl QueryExpression for InMemoryQueryExpression {
    fn get_mapped_projection(&self, member: &ProjectionMember) -> QueryResult<ExprRef> {
        self.mapping.require(member).cloned()
    }

    fn projection_mapping(&self) -> &ProjectionMapping {
        &self.mapping
    }

    fn apply_projection(&mut self, mapping: ProjectionMapping) {
        let layout = ProjectionLayout::from_mapping(&mapping);
        let slots = layout.slots.clone();
        self.wrap(|source| ServerQuery::Project { source, slots });

        let mut new_slots = Vec::with_capacity(layout.slots.len());
        for (i, slot) in layout.slots.iter().enumerate() {
            let read = match slot.as_ref() {
                Expression::Extension(ExtensionExpression::ValueBufferRead(read)) => {
                    ValueBufferRead::expression(i, read.ty.clone(), read.nullable, read.property.as_deref())
                }
                other => ValueBufferRead::expression(i, other.ty(), may_be_null(other), None),
            };
            new_slots.push(read);
        }

        let mut new_mapping = ProjectionMapping::new();
        for ((member, index), (_, expression)) in layout.indexes.iter().zip(mapping.iter()) {
            let remapped = match (index, expression.as_ref()) {
                (
                    ProjectionIndex::EntityValues { start, .. },
                    Expression::Extension(ExtensionExpression::EntityProjection(projection)),
                ) => EntityProjectionExpression::new(
                    projection.entity_type.clone(),
                    new_slots[*start..*start + projection.properties.len()].to_vec(),
                    projection.nullable,
                )
                .into_expression(),
                (ProjectionIndex::Slot(i), _) => new_slots[*i].clone(),
                (_, _) => expression.clone(),
            };
            new_mapping.insert(member.clone(), remapped);
        }

        self.layout = ProjectionLayout {
            slots: new_slots,
            indexes: layout.indexes,
        };
        self.mapping = new_mapping;
    }

    fn projection_index(&self, member: &ProjectionMember) -> QueryResult<ProjectionIndex> {
        self.layout.index_of(member)
    }

    fn slot_count(&self) -> usize {
        self.layout.slots.len()
    }
}

impl fmt::Display for InMemoryQueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.server_query, f)
    }
}
