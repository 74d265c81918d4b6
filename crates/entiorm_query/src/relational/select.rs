//! The relational query expression.

use crate::error::{QueryError, QueryResult};
use crate::expression::{
    ColumnExpression, EntityProjectionExpression, ExprRef, Expression, ExtensionExpression,
    MemberIdentity,
};
use crate::projection::{ProjectionIndex, ProjectionMapping, ProjectionMember};
use crate::query_expression::{OrderingExpression, ProjectionLayout, QueryExpression};
use crate::visitor::map_children;
use entiorm_core::{EntityType, ScalarType};
use std::fmt;
use std::sync::Arc;

/// A table source with its alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableExpression {
    /// Table name.
    pub name: String,
    /// Schema, if any.
    pub schema: Option<String>,
    /// Alias unique within the select.
    pub alias: String,
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    LeftOuter,
}

/// A joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinExpression {
    /// Join flavor.
    pub kind: JoinKind,
    /// Joined table.
    pub table: TableExpression,
    /// `ON` condition.
    pub predicate: ExprRef,
}

/// `SELECT` over one table plus joins.
///
/// Projection mapping values are SQL expressions over the select's tables;
/// the select list is the flattened layout of that mapping. Operators that
/// would need a subquery (filtering, ordering or joining after
/// `Skip`/`Take`/`Distinct`) are rejected with a translation error.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpression {
    table: TableExpression,
    joins: Vec<JoinExpression>,
    predicate: Option<ExprRef>,
    orderings: Vec<OrderingExpression>,
    offset: Option<ExprRef>,
    limit: Option<ExprRef>,
    distinct: bool,
    mapping: ProjectionMapping,
    layout: ProjectionLayout,
}

fn base_alias(table: &str) -> String {
    table
        .chars()
        .next()
        .map(|c| c.to_lowercase().collect())
        .unwrap_or_else(|| "t".to_string())
}

impl SelectExpression {
    /// Creates `SELECT <all columns> FROM <table>` for an entity type.
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        let table = TableExpression {
            name: entity_type.table_name().to_string(),
            schema: entity_type.schema().map(str::to_string),
            alias: base_alias(entity_type.table_name()),
        };
        let columns = entity_type
            .properties()
            .iter()
            .map(|p| ColumnExpression::for_property(p, &table.alias))
            .collect();
        let mapping = ProjectionMapping::root(
            EntityProjectionExpression::new(entity_type, columns, false).into_expression(),
        );
        let layout = ProjectionLayout::from_mapping(&mapping);
        Self {
            table,
            joins: Vec::new(),
            predicate: None,
            orderings: Vec::new(),
            offset: None,
            limit: None,
            distinct: false,
            mapping,
            layout,
        }
    }

    /// Returns the root table.
    pub fn table(&self) -> &TableExpression {
        &self.table
    }

    /// Returns the joined tables.
    pub fn joins(&self) -> &[JoinExpression] {
        &self.joins
    }

    /// Returns the `WHERE` condition.
    pub fn predicate(&self) -> Option<&ExprRef> {
        self.predicate.as_ref()
    }

    /// Returns the `ORDER BY` keys.
    pub fn orderings(&self) -> &[OrderingExpression] {
        &self.orderings
    }

    /// Returns the row offset.
    pub fn offset(&self) -> Option<&ExprRef> {
        self.offset.as_ref()
    }

    /// Returns the row limit.
    pub fn limit(&self) -> Option<&ExprRef> {
        self.limit.as_ref()
    }

    /// Returns true for `SELECT DISTINCT`.
    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Returns the select list, one expression per row position.
    pub fn projection(&self) -> &[ExprRef] {
        &self.layout.slots
    }

    fn require_unlimited(&self, construct: impl fmt::Display) -> QueryResult<()> {
        if self.limit.is_some() || self.offset.is_some() || self.distinct {
            return Err(QueryError::translation(
                construct.to_string(),
                "operator after Skip, Take or Distinct requires a subquery",
            ));
        }
        Ok(())
    }

    /// Adds a condition to `WHERE`, combined with `AND`.
    pub fn apply_predicate(&mut self, predicate: ExprRef) -> QueryResult<()> {
        self.require_unlimited(&predicate)?;
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Expression::and_also(existing, predicate),
            None => predicate,
        });
        Ok(())
    }

    /// Starts a new ordering, or appends a key with `append`.
    pub fn apply_ordering(&mut self, ordering: OrderingExpression, append: bool) -> QueryResult<()> {
        self.require_unlimited(&ordering)?;
        if append {
            if self.orderings.is_empty() {
                return Err(QueryError::translation(
                    ordering.to_string(),
                    "ThenBy must directly follow OrderBy",
                ));
            }
        } else {
            self.orderings.clear();
        }
        self.orderings.push(ordering);
        Ok(())
    }

    /// Sets `OFFSET`.
    pub fn apply_offset(&mut self, offset: ExprRef) -> QueryResult<()> {
        if self.offset.is_some() || self.limit.is_some() {
            return Err(QueryError::translation(
                format!("Skip({offset})"),
                "Skip after Skip or Take requires a subquery",
            ));
        }
        self.offset = Some(offset);
        Ok(())
    }

    /// Sets the row limit. Two constant limits combine to the smaller one.
    pub fn apply_limit(&mut self, limit: ExprRef) -> QueryResult<()> {
        let combined = match &self.limit {
            None => limit,
            Some(existing) => match (
                existing.as_constant().and_then(|v| v.as_integer()),
                limit.as_constant().and_then(|v| v.as_integer()),
            ) {
                (Some(a), Some(b)) => Expression::constant(a.min(b)),
                _ => {
                    return Err(QueryError::translation(
                        format!("Take({limit})"),
                        "Take after a parameterized Take requires a subquery",
                    ))
                }
            },
        };
        self.limit = Some(combined);
        Ok(())
    }

    /// Sets `DISTINCT`.
    pub fn apply_distinct(&mut self) -> QueryResult<()> {
        if self.limit.is_some() || self.offset.is_some() {
            return Err(QueryError::translation(
                "Distinct",
                "Distinct after Skip or Take requires a subquery",
            ));
        }
        self.distinct = true;
        Ok(())
    }

    /// Replaces the select list with `COUNT(*)`.
    pub fn apply_count(&mut self) -> QueryResult<()> {
        self.require_unlimited("Count")?;
        self.orderings.clear();
        self.mapping = ProjectionMapping::root(Expression::extension(
            ExtensionExpression::SqlFunction {
                name: "COUNT".to_string(),
                arguments: Vec::new(),
                ty: ScalarType::Integer,
            },
        ));
        self.layout = ProjectionLayout::from_mapping(&self.mapping);
        Ok(())
    }

    /// Joins `inner` on pairwise equal keys.
    ///
    /// `inner` must be a plain table select; its `WHERE` condition moves into
    /// the `ON` clause. Current members move under `Outer`, inner members
    /// under `Inner`, and every inner column becomes nullable for a left
    /// join.
    pub fn add_join(
        &mut self,
        inner: SelectExpression,
        outer_key: Vec<ExprRef>,
        inner_key: Vec<ExprRef>,
        left: bool,
    ) -> QueryResult<()> {
        self.require_unlimited("Join")?;
        if !inner.joins.is_empty()
            || !inner.orderings.is_empty()
            || inner.limit.is_some()
            || inner.offset.is_some()
            || inner.distinct
        {
            return Err(QueryError::translation(
                inner.to_string(),
                "joined source must be a plain table query",
            ));
        }

        let alias = self.unique_alias(&inner.table.alias);
        let rename = |e: &ExprRef| retarget_columns(e, &inner.table.alias, &alias, left);

        let mut condition: Option<ExprRef> = None;
        for (o, i) in outer_key.iter().zip(&inner_key) {
            let equal = Expression::equal(o.clone(), rename(i));
            condition = Some(match condition {
                Some(c) => Expression::and_also(c, equal),
                None => equal,
            });
        }
        if let Some(inner_predicate) = &inner.predicate {
            let inner_predicate = rename(inner_predicate);
            condition = Some(match condition {
                Some(c) => Expression::and_also(c, inner_predicate),
                None => inner_predicate,
            });
        }
        let predicate = condition.ok_or_else(|| {
            QueryError::translation(inner.to_string(), "join requires at least one key")
        })?;

        let inner_slots = inner.layout.slots.iter().map(rename).collect();
        self.layout = self.layout.join(
            &inner.layout,
            &MemberIdentity::outer(),
            &MemberIdentity::inner(),
            inner_slots,
        );
        let mut mapping = self.mapping.prepend(&MemberIdentity::outer());
        for (member, expression) in inner.mapping.iter() {
            mapping.insert(member.prepend(MemberIdentity::inner()), rename(expression));
        }
        self.mapping = mapping;

        self.joins.push(JoinExpression {
            kind: if left { JoinKind::LeftOuter } else { JoinKind::Inner },
            table: TableExpression { alias, ..inner.table },
            predicate,
        });
        Ok(())
    }

    fn unique_alias(&self, wanted: &str) -> String {
        let taken = |alias: &str| {
            self.table.alias == alias || self.joins.iter().any(|j| j.table.alias == alias)
        };
        if !taken(wanted) {
            return wanted.to_string();
        }
        (0..)
            .map(|i| format!("{wanted}{i}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }
}

/// Points every column of table `from` at `to`, marking them nullable when
/// `make_nullable` is set.
fn retarget_columns(expr: &ExprRef, from: &str, to: &str, make_nullable: bool) -> ExprRef {
    match expr.as_ref() {
        Expression::Extension(ExtensionExpression::Column(column)) if column.table_alias == from => {
            Expression::extension(ExtensionExpression::Column(ColumnExpression {
                table_alias: to.to_string(),
                nullable: column.nullable || make_nullable,
                ..column.clone()
            }))
        }
        Expression::Extension(ExtensionExpression::EntityProjection(projection)) => {
            let mut projection = projection.clone();
            projection.properties = projection
                .properties
                .iter()
                .map(|p| retarget_columns(p, from, to, make_nullable))
                .collect();
            projection.nullable |= make_nullable;
            projection.into_expression()
        }
        _ => map_children(expr, |child| retarget_columns(child, from, to, make_nullable)),
    }
}

impl QueryExpression for SelectExpression {
    fn get_mapped_projection(&self, member: &ProjectionMember) -> QueryResult<ExprRef> {
        self.mapping.require(member).cloned()
    }

    fn projection_mapping(&self) -> &ProjectionMapping {
        &self.mapping
    }

    fn apply_projection(&mut self, mapping: ProjectionMapping) {
        self.layout = ProjectionLayout::from_mapping(&mapping);
        self.mapping = mapping;
    }

    fn projection_index(&self, member: &ProjectionMember) -> QueryResult<ProjectionIndex> {
        self.layout.index_of(member)
    }

    fn slot_count(&self) -> usize {
        self.layout.slots.len()
    }
}

impl fmt::Display for SelectExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        for (i, slot) in self.layout.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{slot}")?;
        }
        write!(f, " FROM {} AS {}", self.table.name, self.table.alias)?;
        for join in &self.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::LeftOuter => "LEFT JOIN",
            };
            write!(
                f,
                " {kind} {} AS {} ON {}",
                join.table.name, join.table.alias, join.predicate
            )?;
        }
        if let Some(predicate) = &self.predicate {
            write!(f, " WHERE {predicate}")?;
        }
        if !self.orderings.is_empty() {
            f.write_str(" ORDER BY ")?;
            for (i, ordering) in self.orderings.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{ordering}")?;
            }
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::Property;

    fn blogs() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .table("Blogs")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text))
            .build()
            .unwrap()
    }

    #[test]
    fn self_join_gets_unique_alias_and_nullable_inner_columns() {
        let mut outer = SelectExpression::new(blogs());
        let inner = SelectExpression::new(blogs());
        let ok = ColumnExpression::for_property(blogs().property("Id").unwrap(), "b");
        outer.add_join(inner, vec![ok.clone()], vec![ok], true).unwrap();

        assert_eq!(outer.joins()[0].table.alias, "b0");
        assert_eq!(outer.slot_count(), 4);
        match outer.projection()[2].as_ref() {
            Expression::Extension(ExtensionExpression::Column(c)) => {
                assert_eq!(c.table_alias, "b0");
                assert!(c.nullable);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            outer.to_string(),
            "SELECT b.Id, b.Name, b0.Id, b0.Name FROM Blogs AS b LEFT JOIN Blogs AS b0 ON (b.Id == b0.Id)"
        );
    }

    #[test]
    fn filtering_after_take_is_rejected() {
        let mut select = SelectExpression::new(blogs());
        select.apply_limit(Expression::constant(5)).unwrap();
        select.apply_limit(Expression::constant(1)).unwrap();
        assert_eq!(select.limit().unwrap().to_string(), "1");
        assert!(select
            .apply_predicate(Expression::constant(true))
            .unwrap_err()
            .is_translation());
    }

    #[test]
    fn count_replaces_select_list() {
        let mut select = SelectExpression::new(blogs());
        select.apply_count().unwrap();
        assert_eq!(select.to_string(), "SELECT COUNT(*) FROM Blogs AS b");
        assert_eq!(
            select.projection_index(&ProjectionMember::new()).unwrap(),
            ProjectionIndex::Slot(0)
        );
    }
}
