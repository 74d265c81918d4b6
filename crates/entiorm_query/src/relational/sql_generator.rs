//! SQL text generation for select expressions.

use crate::error::{QueryError, QueryResult};
use crate::expression::{BinaryOp, ConstantValue, ExprRef, Expression, ExtensionExpression, UnaryOp};
use crate::relational::predicate::CompositePredicateVisitor;
use crate::relational::{JoinKind, SelectExpression};
use entiorm_core::{
    CommandParameter, RelationalCommand, ScalarType, SqlGenerationHelper, Value,
};
use std::collections::HashMap;

/// How row limits are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStyle {
    /// `TOP(n)`, or `OFFSET n ROWS FETCH NEXT m ROWS ONLY` (SQL Server).
    OffsetFetch,
    /// `LIMIT m OFFSET n`.
    LimitOffset,
}

/// SQL text plus the names of the query parameters it references, in order
/// of first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalCommandTemplate {
    text: String,
    parameter_names: Vec<String>,
    helper: SqlGenerationHelper,
}

impl RelationalCommandTemplate {
    /// Returns the SQL text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the referenced query parameter names.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Builds an executable command with values from `parameters`.
    pub fn to_command(&self, parameters: &HashMap<String, Value>) -> QueryResult<RelationalCommand> {
        let parameters = self
            .parameter_names
            .iter()
            .map(|name| {
                parameters
                    .get(name)
                    .map(|value| {
                        CommandParameter::input(self.helper.parameter_name(name), value.clone())
                    })
                    .ok_or_else(|| QueryError::MissingParameter { name: name.clone() })
            })
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(RelationalCommand::new(self.text.clone(), parameters))
    }
}

/// Renders a [`SelectExpression`] as SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySqlGenerator {
    helper: SqlGenerationHelper,
    paging: PagingStyle,
    name: &'static str,
}

impl QuerySqlGenerator {
    /// SQL Server dialect.
    pub fn sql_server() -> Self {
        Self {
            helper: SqlGenerationHelper::sql_server(),
            paging: PagingStyle::OffsetFetch,
            name: "SqlServer",
        }
    }

    /// ANSI dialect with `LIMIT`/`OFFSET` paging.
    pub fn ansi() -> Self {
        Self {
            helper: SqlGenerationHelper::ansi(),
            paging: PagingStyle::LimitOffset,
            name: "Ansi",
        }
    }

    /// Returns the dialect name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the identifier and literal helper.
    pub fn helper(&self) -> &SqlGenerationHelper {
        &self.helper
    }

    /// Generates the command text for `select`.
    pub fn generate(&self, select: &SelectExpression) -> QueryResult<RelationalCommandTemplate> {
        let mut writer = SqlWriter {
            generator: self,
            sql: String::new(),
            parameters: Vec::new(),
        };
        writer.select(select)?;
        tracing::debug!(dialect = self.name, sql = %writer.sql, "generated query SQL");
        Ok(RelationalCommandTemplate {
            text: writer.sql,
            parameter_names: writer.parameters,
            helper: self.helper.clone(),
        })
    }
}

impl Default for QuerySqlGenerator {
    fn default() -> Self {
        Self::ansi()
    }
}

struct SqlWriter<'a> {
    generator: &'a QuerySqlGenerator,
    sql: String,
    parameters: Vec<String>,
}

fn is_condition(expr: &Expression) -> bool {
    match expr {
        Expression::Binary { op, .. } => op.is_comparison() || op.is_logical(),
        Expression::Unary {
            op: UnaryOp::Not, ..
        } => true,
        Expression::Extension(ExtensionExpression::IsNull { .. })
        | Expression::Extension(ExtensionExpression::In { .. }) => true,
        _ => false,
    }
}

fn comparison_operator(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Equal => " = ",
        BinaryOp::NotEqual => " <> ",
        BinaryOp::LessThan => " < ",
        BinaryOp::LessThanOrEqual => " <= ",
        BinaryOp::GreaterThan => " > ",
        BinaryOp::GreaterThanOrEqual => " >= ",
        BinaryOp::AndAlso => " AND ",
        BinaryOp::OrElse => " OR ",
        BinaryOp::Add => " + ",
        BinaryOp::Subtract => " - ",
        BinaryOp::Multiply => " * ",
        BinaryOp::Divide => " / ",
    }
}

impl SqlWriter<'_> {
    fn bits(&self) -> bool {
        self.generator.helper.bool_literals_as_bits()
    }

    fn select(&mut self, select: &SelectExpression) -> QueryResult<()> {
        let generator = self.generator;
        let helper = &generator.helper;
        let offset_fetch = generator.paging == PagingStyle::OffsetFetch;

        self.sql.push_str("SELECT ");
        if select.is_distinct() {
            self.sql.push_str("DISTINCT ");
        }
        if offset_fetch && select.offset().is_none() {
            if let Some(limit) = select.limit() {
                self.sql.push_str("TOP(");
                self.value(limit)?;
                self.sql.push_str(") ");
            }
        }
        for (i, slot) in select.projection().iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.value(slot)?;
        }

        let table = select.table();
        self.sql.push_str("\nFROM ");
        self.sql
            .push_str(&helper.delimit_identifier_with_schema(&table.name, table.schema.as_deref()));
        self.sql.push_str(" AS ");
        helper.append_delimited(&mut self.sql, &table.alias);

        for join in select.joins() {
            self.sql.push_str(match join.kind {
                JoinKind::Inner => "\nINNER JOIN ",
                JoinKind::LeftOuter => "\nLEFT JOIN ",
            });
            self.sql.push_str(
                &helper.delimit_identifier_with_schema(&join.table.name, join.table.schema.as_deref()),
            );
            self.sql.push_str(" AS ");
            helper.append_delimited(&mut self.sql, &join.table.alias);
            self.sql.push_str(" ON ");
            self.condition(&join.predicate)?;
        }

        if let Some(predicate) = select.predicate() {
            self.sql.push_str("\nWHERE ");
            self.condition(&CompositePredicateVisitor::optimize(predicate))?;
        }

        if !select.orderings().is_empty() {
            self.sql.push_str("\nORDER BY ");
            for (i, ordering) in select.orderings().iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.value(&ordering.expression)?;
                if !ordering.ascending {
                    self.sql.push_str(" DESC");
                }
            }
        } else if offset_fetch && select.offset().is_some() {
            self.sql.push_str("\nORDER BY (SELECT 1)");
        }

        match generator.paging {
            PagingStyle::OffsetFetch => {
                if let Some(offset) = select.offset() {
                    self.sql.push_str("\nOFFSET ");
                    self.value(offset)?;
                    self.sql.push_str(" ROWS");
                    if let Some(limit) = select.limit() {
                        self.sql.push_str(" FETCH NEXT ");
                        self.value(limit)?;
                        self.sql.push_str(" ROWS ONLY");
                    }
                }
            }
            PagingStyle::LimitOffset => {
                if let Some(limit) = select.limit() {
                    self.sql.push_str("\nLIMIT ");
                    self.value(limit)?;
                }
                if let Some(offset) = select.offset() {
                    self.sql.push_str(if select.limit().is_some() { " OFFSET " } else { "\nOFFSET " });
                    self.value(offset)?;
                }
            }
        }
        Ok(())
    }

    /// Emits `expr` where SQL expects a search condition.
    fn condition(&mut self, expr: &ExprRef) -> QueryResult<()> {
        match expr.as_ref() {
            Expression::Binary { op, left, right } if op.is_logical() => {
                self.logical_operand(*op, left)?;
                self.sql.push_str(comparison_operator(*op));
                self.logical_operand(*op, right)
            }
            Expression::Binary { op, left, right } if op.is_comparison() => {
                self.value(left)?;
                self.sql.push_str(comparison_operator(*op));
                self.value(right)
            }
            Expression::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                self.sql.push_str("NOT (");
                self.condition(operand)?;
                self.sql.push(')');
                Ok(())
            }
            Expression::Extension(ExtensionExpression::IsNull { operand, negated }) => {
                self.value(operand)?;
                self.sql
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                Ok(())
            }
            Expression::Extension(ExtensionExpression::In {
                operand,
                values,
                negated,
            }) => {
                self.value(operand)?;
                self.sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.value(value)?;
                }
                self.sql.push(')');
                Ok(())
            }
            Expression::Constant(ConstantValue::Value(Value::Bool(b))) if self.bits() => {
                self.sql.push_str(if *b { "1 = 1" } else { "0 = 1" });
                Ok(())
            }
            _ if self.bits() => {
                self.value(expr)?;
                self.sql.push_str(" = CAST(1 AS bit)");
                Ok(())
            }
            _ => self.value(expr),
        }
    }

    fn logical_operand(&mut self, parent: BinaryOp, operand: &ExprRef) -> QueryResult<()> {
        let nested = matches!(operand.as_ref(), Expression::Binary { op, .. } if op.is_logical() && *op != parent);
        if nested {
            self.sql.push('(');
        }
        self.condition(operand)?;
        if nested {
            self.sql.push(')');
        }
        Ok(())
    }

    /// Emits `expr` where SQL expects a value.
    fn value(&mut self, expr: &ExprRef) -> QueryResult<()> {
        match expr.as_ref() {
            Expression::Extension(ExtensionExpression::Column(column)) => {
                let generator = self.generator;
                let helper = &generator.helper;
                helper.append_delimited(&mut self.sql, &column.table_alias);
                self.sql.push('.');
                helper.append_delimited(&mut self.sql, &column.name);
                Ok(())
            }
            Expression::Constant(ConstantValue::Value(v)) => {
                self.sql.push_str(&self.generator.helper.literal(v));
                Ok(())
            }
            Expression::QueryParameter { name, .. } => {
                if !self.parameters.contains(name) {
                    self.parameters.push(name.clone());
                }
                self.sql.push_str(&self.generator.helper.parameter_name(name));
                Ok(())
            }
            Expression::Binary { op, left, right } if !op.is_comparison() && !op.is_logical() => {
                let text_concat = *op == BinaryOp::Add
                    && left.ty() == crate::expression::ExprType::Scalar(ScalarType::Text)
                    && self.generator.paging == PagingStyle::LimitOffset;
                self.sql.push('(');
                self.value(left)?;
                self.sql
                    .push_str(if text_concat { " || " } else { comparison_operator(*op) });
                self.value(right)?;
                self.sql.push(')');
                Ok(())
            }
            Expression::Unary {
                op: UnaryOp::Negate,
                operand,
            } => {
                self.sql.push('-');
                self.value(operand)
            }
            Expression::Conditional {
                test,
                if_true,
                if_false,
            } => {
                self.sql.push_str("CASE WHEN ");
                self.condition(test)?;
                self.sql.push_str(" THEN ");
                self.value(if_true)?;
                self.sql.push_str(" ELSE ");
                self.value(if_false)?;
                self.sql.push_str(" END");
                Ok(())
            }
            Expression::Extension(ExtensionExpression::SqlFunction {
                name, arguments, ..
            }) => {
                self.sql.push_str(name);
                self.sql.push('(');
                if arguments.is_empty() {
                    self.sql.push('*');
                }
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.value(argument)?;
                }
                self.sql.push(')');
                Ok(())
            }
            other if is_condition(other) => {
                if self.bits() {
                    self.sql.push_str("CASE WHEN ");
                    self.condition(expr)?;
                    self.sql
                        .push_str(" THEN CAST(1 AS bit) ELSE CAST(0 AS bit) END");
                } else {
                    self.sql.push('(');
                    self.condition(expr)?;
                    self.sql.push(')');
                }
                Ok(())
            }
            other => Err(QueryError::translation(
                other.to_string(),
                "expression cannot be rendered as SQL",
            )),
        }
    }
}
