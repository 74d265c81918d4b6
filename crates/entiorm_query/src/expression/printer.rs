//! Deterministic textual rendering of expression trees.
//!
//! The output is used in diagnostics and as the compiled-query cache key, so
//! two trees print the same text exactly when they have the same shape and
//! the same literals. Text literals are quoted with embedded quotes and
//! backslashes escaped.
//!
//! Entity roots print as `DbSet<Name>`, which names the entity type but not
//! the model it belongs to; printed text is only comparable within one model.

use crate::expression::{
    ConstantValue, ExprRef, Expression, ExtensionExpression, MemberIdentity, UnaryOp,
};
use entiorm_core::Value;
use std::fmt::Write;

/// Renders expression trees as text.
#[derive(Debug, Default)]
pub struct ExpressionPrinter {
    out: String,
}

impl ExpressionPrinter {
    /// Prints a tree.
    pub fn print(expr: &Expression) -> String {
        let mut printer = Self::default();
        printer.visit(expr);
        printer.out
    }

    fn list<'a>(&mut self, items: impl IntoIterator<Item = &'a Expression>) {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.visit(item);
        }
    }

    fn text_literal(&mut self, text: &str) {
        self.out.push('"');
        for c in text.chars() {
            match c {
                '"' => self.out.push_str("\\\""),
                '\\' => self.out.push_str("\\\\"),
                c => self.out.push(c),
            }
        }
        self.out.push('"');
    }

    fn visit(&mut self, expr: &Expression) {
        match expr {
            Expression::Constant(ConstantValue::Value(Value::Text(text))) => {
                self.text_literal(text);
            }
            Expression::Constant(ConstantValue::Value(v)) => {
                let _ = write!(self.out, "{v}");
            }
            Expression::Constant(ConstantValue::EntityQueryable(et)) => {
                let _ = write!(self.out, "DbSet<{}>", et.name());
            }
            Expression::Parameter { name, .. } => self.out.push_str(name),
            Expression::QueryParameter { name, .. } => {
                let _ = write!(self.out, "@{name}");
            }
            Expression::Member {
                expression, member, ..
            } => {
                self.visit(expression);
                let _ = write!(self.out, ".{}", member.name());
            }
            Expression::Unary { op, operand } => {
                self.out.push(match op {
                    UnaryOp::Not => '!',
                    UnaryOp::Negate => '-',
                });
                self.visit(operand);
            }
            Expression::Binary { op, left, right } => {
                self.out.push('(');
                self.visit(left);
                let _ = write!(self.out, " {} ", op.symbol());
                self.visit(right);
                self.out.push(')');
            }
            Expression::Conditional {
                test,
                if_true,
                if_false,
            } => {
                self.out.push('(');
                self.visit(test);
                self.out.push_str(" ? ");
                self.visit(if_true);
                self.out.push_str(" : ");
                self.visit(if_false);
                self.out.push(')');
            }
            Expression::New {
                type_name,
                arguments,
            } => {
                let _ = write!(self.out, "new {type_name}(");
                self.members(arguments);
                self.out.push(')');
            }
            Expression::MemberInit {
                type_name,
                bindings,
            } => {
                let _ = write!(self.out, "new {type_name} {{ ");
                self.members(bindings);
                self.out.push_str(" }");
            }
            Expression::Lambda { parameters, body } => {
                if parameters.len() == 1 {
                    self.visit(&parameters[0]);
                } else {
                    self.out.push('(');
                    self.list(parameters.iter().map(|p| p.as_ref()));
                    self.out.push(')');
                }
                self.out.push_str(" => ");
                self.visit(body);
            }
            Expression::Call { method, arguments } => {
                let _ = write!(self.out, "{}(", method.name());
                self.list(arguments.iter().map(|a| a.as_ref()));
                self.out.push(')');
            }
            Expression::ClientCall {
                name, arguments, ..
            } => {
                let _ = write!(self.out, "{name}(");
                self.list(arguments.iter().map(|a| a.as_ref()));
                self.out.push(')');
            }
            Expression::Extension(ext) => self.visit_extension(ext),
        }
    }

    fn members(&mut self, members: &[(MemberIdentity, ExprRef)]) {
        for (i, (member, value)) in members.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let _ = write!(self.out, "{} = ", member.name());
            self.visit(value);
        }
    }

    fn visit_extension(&mut self, ext: &ExtensionExpression) {
        match ext {
            ExtensionExpression::ShapedQuery(shaped) => {
                let _ = write!(
                    self.out,
                    "ShapedQuery[{:?}]({}; ",
                    shaped.cardinality, shaped.query_expression
                );
                self.visit(&shaped.shaper);
                self.out.push(')');
            }
            ExtensionExpression::EntityShaper(shaper) => {
                let _ = write!(
                    self.out,
                    "{:?}EntityShaper<{}>(offset: {}, ",
                    shaper.kind(),
                    shaper.entity_type.name(),
                    shaper.offset
                );
                self.visit(&shaper.value_buffer);
                self.out.push(')');
            }
            ExtensionExpression::ProjectionBinding(binding) => {
                let _ = write!(self.out, "ProjectionBinding({})", binding.member());
            }
            ExtensionExpression::ValueBufferRead(read) => {
                let _ = write!(self.out, "valueBuffer[{}]", read.index);
            }
            ExtensionExpression::EntityProjection(projection) => {
                let _ = write!(
                    self.out,
                    "EntityProjection<{}>(",
                    projection.entity_type.name()
                );
                self.list(projection.properties.iter().map(|p| p.as_ref()));
                self.out.push(')');
            }
            ExtensionExpression::Column(column) => {
                let _ = write!(self.out, "{}.{}", column.table_alias, column.name);
            }
            ExtensionExpression::In {
                operand,
                values,
                negated,
            } => {
                self.visit(operand);
                self.out
                    .push_str(if *negated { " NOT IN (" } else { " IN (" });
                self.list(values.iter().map(|v| v.as_ref()));
                self.out.push(')');
            }
            ExtensionExpression::IsNull { operand, negated } => {
                self.visit(operand);
                self.out
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            ExtensionExpression::SqlFunction {
                name, arguments, ..
            } => {
                let _ = write!(self.out, "{name}(");
                if arguments.is_empty() {
                    self.out.push('*');
                } else {
                    self.list(arguments.iter().map(|a| a.as_ref()));
                }
                self.out.push(')');
            }
        }
    }
}
