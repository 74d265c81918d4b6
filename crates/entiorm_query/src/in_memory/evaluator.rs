//! Evaluation of server queries against an in-memory store.
//!
//! Expressions follow client semantics: `null == null` is true and ordering
//! comparisons involving null are false.

use crate::error::{QueryError, QueryResult};
use crate::expression::{BinaryOp, ConstantValue, Expression, ExtensionExpression, UnaryOp};
use crate::in_memory::{InMemoryStore, ServerQuery};
use entiorm_core::{Value, ValueBuffer};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Evaluates server queries and row expressions.
#[derive(Debug, Clone, Copy)]
pub struct InMemoryQueryEvaluator<'a> {
    store: &'a InMemoryStore,
    parameters: &'a HashMap<String, Value>,
}

impl<'a> InMemoryQueryEvaluator<'a> {
    /// Creates an evaluator over `store` with the given parameter values.
    pub fn new(store: &'a InMemoryStore, parameters: &'a HashMap<String, Value>) -> Self {
        Self { store, parameters }
    }

    /// Produces every row of `query`.
    pub fn evaluate(&self, query: &ServerQuery) -> QueryResult<Vec<ValueBuffer>> {
        match query {
            ServerQuery::Table(et) => Ok(self.store.rows(et)),
            ServerQuery::Filter { source, predicate } => {
                let mut rows = Vec::new();
                for row in self.evaluate(source)? {
                    if self.predicate(predicate, &row)? {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
            ServerQuery::Project { source, slots } => self
                .evaluate(source)?
                .iter()
                .map(|row| {
                    slots
                        .iter()
                        .map(|slot| self.value(slot, row))
                        .collect::<QueryResult<Vec<_>>>()
                        .map(ValueBuffer::new)
                })
                .collect(),
            ServerQuery::OrderBy { source, orderings } => {
                let rows = self.evaluate(source)?;
                let mut keyed = rows
                    .into_iter()
                    .map(|row| {
                        let keys = orderings
                            .iter()
                            .map(|o| self.value(&o.expression, &row))
                            .collect::<QueryResult<Vec<_>>>()?;
                        Ok((keys, row))
                    })
                    .collect::<QueryResult<Vec<_>>>()?;
                keyed.sort_by(|(a, _), (b, _)| {
                    for ((x, y), ordering) in a.iter().zip(b).zip(orderings) {
                        let cmp = x.sort_cmp(y);
                        let cmp = if ordering.ascending { cmp } else { cmp.reverse() };
                        if cmp != Ordering::Equal {
                            return cmp;
                        }
                    }
                    Ordering::Equal
                });
                Ok(keyed.into_iter().map(|(_, row)| row).collect())
            }
            ServerQuery::Skip { source, count } => {
                let count = self.count(count)?;
                Ok(self.evaluate(source)?.into_iter().skip(count).collect())
            }
            ServerQuery::Take { source, count } => {
                let count = self.count(count)?;
                Ok(self.evaluate(source)?.into_iter().take(count).collect())
            }
            ServerQuery::Distinct { source } => {
                let mut seen = HashSet::new();
                Ok(self
                    .evaluate(source)?
                    .into_iter()
                    .filter(|row| seen.insert(row.values().to_vec()))
                    .collect())
            }
            ServerQuery::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                left,
                inner_width,
            } => {
                let inner_rows = self.evaluate(inner)?;
                let mut lookup: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
                for (i, row) in inner_rows.iter().enumerate() {
                    if let Some(key) = self.join_key(inner_key, row)? {
                        lookup.entry(key).or_default().push(i);
                    }
                }

                let mut rows = Vec::new();
                for row in self.evaluate(outer)? {
                    let matches = match self.join_key(outer_key, &row)? {
                        Some(key) => lookup.get(&key).map(Vec::as_slice).unwrap_or(&[]),
                        None => &[],
                    };
                    if matches.is_empty() && *left {
                        rows.push(row.concat(&ValueBuffer::nulls(*inner_width)));
                    }
                    for &i in matches {
                        rows.push(row.concat(&inner_rows[i]));
                    }
                }
                Ok(rows)
            }
            ServerQuery::Count { source } => {
                let count = self.evaluate(source)?.len();
                Ok(vec![ValueBuffer::new(vec![Value::Integer(count as i64)])])
            }
        }
    }

    /// Evaluates a boolean expression; null counts as false.
    pub fn predicate(&self, expr: &Expression, row: &ValueBuffer) -> QueryResult<bool> {
        match self.value(expr, row)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(QueryError::evaluation(format!(
                "predicate '{expr}' produced non-boolean value {other}"
            ))),
        }
    }

    /// Evaluates an expression over `row`.
    pub fn value(&self, expr: &Expression, row: &ValueBuffer) -> QueryResult<Value> {
        match expr {
            Expression::Constant(ConstantValue::Value(v)) => Ok(v.clone()),
            Expression::QueryParameter { name, .. } => self
                .parameters
                .get(name)
                .cloned()
                .ok_or_else(|| QueryError::MissingParameter { name: name.clone() }),
            Expression::Extension(ExtensionExpression::ValueBufferRead(read)) => {
                row.get(read.index).cloned().ok_or_else(|| {
                    QueryError::evaluation(format!(
                        "row of {} values has no position {}",
                        row.len(),
                        read.index
                    ))
                })
            }
            Expression::Unary { op, operand } => {
                let value = self.value(operand, row)?;
                match (op, value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Negate, Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| QueryError::evaluation("integer overflow")),
                    (_, other) => Err(QueryError::evaluation(format!(
                        "cannot apply '{expr}' to {other}"
                    ))),
                }
            }
            Expression::Binary {
                op: BinaryOp::AndAlso,
                left,
                right,
            } => Ok(Value::Bool(
                self.predicate(left, row)? && self.predicate(right, row)?,
            )),
            Expression::Binary {
                op: BinaryOp::OrElse,
                left,
                right,
            } => Ok(Value::Bool(
                self.predicate(left, row)? || self.predicate(right, row)?,
            )),
            Expression::Binary { op, left, right } => {
                let l = self.value(left, row)?;
                let r = self.value(right, row)?;
                binary(*op, l, r)
            }
            Expression::Conditional {
                test,
                if_true,
                if_false,
            } => {
                if self.predicate(test, row)? {
                    self.value(if_true, row)
                } else {
                    self.value(if_false, row)
                }
            }
            Expression::Extension(ExtensionExpression::IsNull { operand, negated }) => {
                Ok(Value::Bool(self.value(operand, row)?.is_null() != *negated))
            }
            Expression::Extension(ExtensionExpression::In {
                operand,
                values,
                negated,
            }) => {
                let operand = self.value(operand, row)?;
                let mut found = false;
                for candidate in values {
                    if self.value(candidate, row)? == operand {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(found != *negated))
            }
            other => Err(QueryError::evaluation(format!(
                "'{other}' cannot be evaluated by the in-memory provider"
            ))),
        }
    }

    fn count(&self, expr: &Expression) -> QueryResult<usize> {
        match self.value(expr, &ValueBuffer::default())? {
            Value::Integer(i) if i >= 0 => Ok(i as usize),
            other => Err(QueryError::evaluation(format!(
                "row count must be a non-negative integer, got {other}"
            ))),
        }
    }

    fn join_key(
        &self,
        parts: &[crate::expression::ExprRef],
        row: &ValueBuffer,
    ) -> QueryResult<Option<Vec<Value>>> {
        let mut key = Vec::with_capacity(parts.len());
        for part in parts {
            match self.value(part, row)? {
                Value::Null => return Ok(None),
                v => key.push(v),
            }
        }
        Ok(Some(key))
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> QueryResult<Value> {
    let ordered = |accept: fn(Ordering) -> bool| Value::Bool(l.compare(&r).is_some_and(accept));
    Ok(match op {
        BinaryOp::Equal => Value::Bool(l == r),
        BinaryOp::NotEqual => Value::Bool(l != r),
        BinaryOp::LessThan => ordered(Ordering::is_lt),
        BinaryOp::LessThanOrEqual => ordered(Ordering::is_le),
        BinaryOp::GreaterThan => ordered(Ordering::is_gt),
        BinaryOp::GreaterThanOrEqual => ordered(Ordering::is_ge),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            return arithmetic(op, l, r)
        }
        BinaryOp::AndAlso | BinaryOp::OrElse => {
            return Err(QueryError::evaluation("logical operator evaluated eagerly"))
        }
    })
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> QueryResult<Value> {
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => Ok(Value::Text(a + &b)),
        (Value::Integer(a), Value::Integer(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                _ => {
                    if b == 0 {
                        return Err(QueryError::evaluation("division by zero"));
                    }
                    a.checked_div(b)
                }
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| QueryError::evaluation("integer overflow"))
        }
        (a, b) => Err(QueryError::evaluation(format!(
            "cannot apply '{}' to {a} and {b}",
            op.symbol()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExprType, ValueBufferRead};
    use entiorm_core::ScalarType;

    fn read(i: usize) -> crate::expression::ExprRef {
        ValueBufferRead::expression(i, ExprType::Scalar(ScalarType::Integer), true, None)
    }

    #[test]
    fn client_null_semantics() {
        let store = InMemoryStore::new();
        let params = HashMap::new();
        let eval = InMemoryQueryEvaluator::new(&store, &params);
        let row = ValueBuffer::new(vec![Value::Null, Value::Null, Value::Integer(1)]);

        assert!(eval.predicate(&Expression::equal(read(0), read(1)), &row).unwrap());
        assert!(!eval
            .predicate(&Expression::binary(BinaryOp::LessThan, read(0), read(2)), &row)
            .unwrap());
        assert!(eval.predicate(&Expression::not_equal(read(0), read(2)), &row).unwrap());
    }

    #[test]
    fn missing_parameter_is_reported() {
        let store = InMemoryStore::new();
        let params = HashMap::new();
        let eval = InMemoryQueryEvaluator::new(&store, &params);
        let err = eval
            .value(
                &Expression::query_parameter("p", ScalarType::Integer),
                &ValueBuffer::default(),
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::MissingParameter { name } if name == "p"));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(arithmetic(BinaryOp::Divide, Value::Integer(1), Value::Integer(0)).is_err());
        assert_eq!(
            arithmetic(BinaryOp::Add, Value::Integer(1), Value::Null).unwrap(),
            Value::Null
        );
    }
}
