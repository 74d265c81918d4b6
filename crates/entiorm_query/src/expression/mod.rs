//! The query expression tree.
//!
//! Trees are immutable and shared through [`ExprRef`]. Visitors rebuild the
//! nodes they change and keep every untouched subtree, so node identity
//! (`Arc::ptr_eq`) is stable for the parts of a tree a pass does not rewrite.

mod extension;
mod printer;

pub use extension::{
    ColumnExpression, EntityProjectionExpression, ExtensionExpression, ValueBufferRead,
};
pub use printer::ExpressionPrinter;

use crate::error::{QueryError, QueryResult};
use crate::projection::{ProjectionBindingExpression, ProjectionMember};
use crate::shaper::{EntityShaperExpression, ShapedQueryExpression};
use entiorm_core::{EntityType, ScalarType, Value};
use std::fmt;
use std::sync::Arc;

/// Shared handle to an expression node.
pub type ExprRef = Arc<Expression>;

/// Declaring type name used for the members of a join result.
pub const TRANSPARENT_IDENTIFIER: &str = "TransparentIdentifier";

/// Identifies a field or property of a structural type.
///
/// Two identities are equal when both the declaring type and the name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberIdentity {
    declaring_type: Arc<str>,
    name: Arc<str>,
}

impl MemberIdentity {
    /// Creates a member identity.
    pub fn new(declaring_type: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            declaring_type: Arc::from(declaring_type.as_ref()),
            name: Arc::from(name.as_ref()),
        }
    }

    /// The `Outer` member of a join result.
    pub fn outer() -> Self {
        Self::new(TRANSPARENT_IDENTIFIER, "Outer")
    }

    /// The `Inner` member of a join result.
    pub fn inner() -> Self {
        Self::new(TRANSPARENT_IDENTIFIER, "Inner")
    }

    /// Returns the declaring type name.
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// Returns the member name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MemberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Static type of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprType {
    /// A scalar value.
    Scalar(ScalarType),
    /// An entity of the named type.
    Entity(String),
    /// A structural object (anonymous type, DTO, join result).
    Object(String),
    /// A physical row.
    ValueBuffer,
    /// A sequence of results.
    Queryable,
    /// Not known statically (e.g. a null literal).
    Unknown,
}

impl ExprType {
    /// Returns true for the boolean scalar type.
    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Scalar(ScalarType::Bool))
    }
}

/// Value of a constant node.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// A scalar literal.
    Value(Value),
    /// The root of a query over all entities of a type.
    EntityQueryable(Arc<EntityType>),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Negate,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// Short-circuit `&&`.
    AndAlso,
    /// Short-circuit `||`.
    OrElse,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
}

impl BinaryOp {
    /// Returns true for `==`, `!=`, `<`, `<=`, `>`, `>=`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
        )
    }

    /// Returns true for `&&` and `||`.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::AndAlso | Self::OrElse)
    }

    /// Returns the comparison that holds exactly when `self` does not.
    pub fn negate_comparison(self) -> Option<Self> {
        Some(match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::LessThan => Self::GreaterThanOrEqual,
            Self::LessThanOrEqual => Self::GreaterThan,
            Self::GreaterThan => Self::LessThanOrEqual,
            Self::GreaterThanOrEqual => Self::LessThan,
            _ => return None,
        })
    }

    /// Operator symbol used by the printer.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::AndAlso => "&&",
            Self::OrElse => "||",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }
}

/// Queryable operators understood by the translation stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryMethod {
    /// `Where(source, predicate)`
    Where,
    /// `Select(source, selector)`
    Select,
    /// `OrderBy(source, key)`
    OrderBy,
    /// `OrderByDescending(source, key)`
    OrderByDescending,
    /// `ThenBy(source, key)`
    ThenBy,
    /// `ThenByDescending(source, key)`
    ThenByDescending,
    /// `Skip(source, count)`
    Skip,
    /// `Take(source, count)`
    Take,
    /// `Distinct(source)`
    Distinct,
    /// `Join(outer, inner, outerKey, innerKey[, resultSelector])`
    Join,
    /// `LeftJoin(outer, inner, outerKey, innerKey[, resultSelector])`
    LeftJoin,
    /// `First(source)`
    First,
    /// `FirstOrDefault(source)`
    FirstOrDefault,
    /// `Single(source)`
    Single,
    /// `SingleOrDefault(source)`
    SingleOrDefault,
    /// `Count(source)`
    Count,
    /// `AsTracking(source)`
    AsTracking,
    /// `AsNoTracking(source)`
    AsNoTracking,
    /// Any other operator; never translatable.
    Other(String),
}

impl QueryMethod {
    /// Returns the operator name.
    pub fn name(&self) -> &str {
        match self {
            Self::Where => "Where",
            Self::Select => "Select",
            Self::OrderBy => "OrderBy",
            Self::OrderByDescending => "OrderByDescending",
            Self::ThenBy => "ThenBy",
            Self::ThenByDescending => "ThenByDescending",
            Self::Skip => "Skip",
            Self::Take => "Take",
            Self::Distinct => "Distinct",
            Self::Join => "Join",
            Self::LeftJoin => "LeftJoin",
            Self::First => "First",
            Self::FirstOrDefault => "FirstOrDefault",
            Self::Single => "Single",
            Self::SingleOrDefault => "SingleOrDefault",
            Self::Count => "Count",
            Self::AsTracking => "AsTracking",
            Self::AsNoTracking => "AsNoTracking",
            Self::Other(name) => name,
        }
    }
}

/// A node of the query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal or a query root.
    Constant(ConstantValue),
    /// A lambda parameter.
    Parameter {
        /// Parameter name.
        name: String,
        /// Parameter type.
        ty: ExprType,
    },
    /// A value supplied at execution time through the query context.
    QueryParameter {
        /// Parameter name.
        name: String,
        /// Parameter type.
        ty: ScalarType,
    },
    /// Access of a field or property.
    Member {
        /// Receiver.
        expression: ExprRef,
        /// Accessed member.
        member: MemberIdentity,
        /// Member type.
        ty: ExprType,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: ExprRef,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: ExprRef,
        /// Right operand.
        right: ExprRef,
    },
    /// `test ? if_true : if_false`
    Conditional {
        /// Condition.
        test: ExprRef,
        /// Value when the condition holds.
        if_true: ExprRef,
        /// Value otherwise.
        if_false: ExprRef,
    },
    /// Construction of a structural object from constructor arguments.
    New {
        /// Constructed type.
        type_name: String,
        /// Arguments with the member each one initializes.
        arguments: Vec<(MemberIdentity, ExprRef)>,
    },
    /// Construction of an object through member assignments.
    MemberInit {
        /// Constructed type.
        type_name: String,
        /// Member assignments.
        bindings: Vec<(MemberIdentity, ExprRef)>,
    },
    /// A lambda.
    Lambda {
        /// Parameters; each is a [`Expression::Parameter`] node.
        parameters: Vec<ExprRef>,
        /// Body.
        body: ExprRef,
    },
    /// A queryable operator call; the first argument is the source.
    Call {
        /// Operator.
        method: QueryMethod,
        /// Arguments.
        arguments: Vec<ExprRef>,
    },
    /// A call into client code; never translatable.
    ClientCall {
        /// Method name.
        name: String,
        /// Arguments.
        arguments: Vec<ExprRef>,
        /// Result type.
        ty: ExprType,
    },
    /// Provider and pipeline specific nodes.
    Extension(ExtensionExpression),
}

impl Expression {
    /// A scalar literal.
    pub fn constant(value: impl Into<Value>) -> ExprRef {
        Arc::new(Self::Constant(ConstantValue::Value(value.into())))
    }

    /// A query root over all entities of a type.
    pub fn entity_queryable(entity_type: &Arc<EntityType>) -> ExprRef {
        Arc::new(Self::Constant(ConstantValue::EntityQueryable(
            entity_type.clone(),
        )))
    }

    /// A lambda parameter.
    pub fn parameter(name: impl Into<String>, ty: ExprType) -> ExprRef {
        Arc::new(Self::Parameter {
            name: name.into(),
            ty,
        })
    }

    /// A lambda parameter typed as an entity.
    pub fn entity_parameter(name: impl Into<String>, entity_type: &EntityType) -> ExprRef {
        Self::parameter(name, ExprType::Entity(entity_type.name().to_string()))
    }

    /// A value supplied at execution time.
    pub fn query_parameter(name: impl Into<String>, ty: ScalarType) -> ExprRef {
        Arc::new(Self::QueryParameter {
            name: name.into(),
            ty,
        })
    }

    /// A member access.
    pub fn member(expression: &ExprRef, member: MemberIdentity, ty: ExprType) -> ExprRef {
        Arc::new(Self::Member {
            expression: expression.clone(),
            member,
            ty,
        })
    }

    /// Access of a mapped property on an entity-typed expression.
    pub fn property(
        expression: &ExprRef,
        entity_type: &EntityType,
        name: &str,
    ) -> QueryResult<ExprRef> {
        let property = entity_type.property(name)?;
        Ok(Self::member(
            expression,
            MemberIdentity::new(entity_type.name(), name),
            ExprType::Scalar(property.scalar_type()),
        ))
    }

    /// Access of a field of a structural object built by [`Expression::new_object`].
    pub fn field(expression: &ExprRef, name: &str) -> QueryResult<ExprRef> {
        let (type_name, ty) = match expression.as_ref() {
            Self::New { type_name, arguments } | Self::MemberInit { type_name, bindings: arguments } => {
                let ty = arguments
                    .iter()
                    .find(|(m, _)| m.name() == name)
                    .map(|(_, e)| e.ty())
                    .ok_or_else(|| {
                        QueryError::translation(
                            format!("{type_name}.{name}"),
                            "object has no such member",
                        )
                    })?;
                (type_name.clone(), ty)
            }
            Self::Parameter { ty: ExprType::Object(type_name), .. } => {
                (type_name.clone(), ExprType::Unknown)
            }
            _ => {
                return Err(QueryError::translation(
                    ExpressionPrinter::print(expression),
                    format!("cannot access member '{name}'"),
                ))
            }
        };
        Ok(Self::member(expression, MemberIdentity::new(type_name, name), ty))
    }

    /// A unary operation.
    pub fn unary(op: UnaryOp, operand: ExprRef) -> ExprRef {
        Arc::new(Self::Unary { op, operand })
    }

    /// Logical negation.
    pub fn not(operand: ExprRef) -> ExprRef {
        Self::unary(UnaryOp::Not, operand)
    }

    /// A binary operation.
    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        Arc::new(Self::Binary { op, left, right })
    }

    /// `left == right`
    pub fn equal(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Equal, left, right)
    }

    /// `left != right`
    pub fn not_equal(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::NotEqual, left, right)
    }

    /// `left && right`
    pub fn and_also(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::AndAlso, left, right)
    }

    /// `left || right`
    pub fn or_else(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::OrElse, left, right)
    }

    /// A conditional.
    pub fn conditional(test: ExprRef, if_true: ExprRef, if_false: ExprRef) -> ExprRef {
        Arc::new(Self::Conditional {
            test,
            if_true,
            if_false,
        })
    }

    /// An anonymous-object construction; each argument initializes the
    /// member of the same name.
    pub fn new_object<'a>(
        type_name: &str,
        arguments: impl IntoIterator<Item = (&'a str, ExprRef)>,
    ) -> ExprRef {
        Arc::new(Self::New {
            type_name: type_name.to_string(),
            arguments: arguments
                .into_iter()
                .map(|(name, e)| (MemberIdentity::new(type_name, name), e))
                .collect(),
        })
    }

    /// An object construction through member assignments.
    pub fn member_init<'a>(
        type_name: &str,
        bindings: impl IntoIterator<Item = (&'a str, ExprRef)>,
    ) -> ExprRef {
        Arc::new(Self::MemberInit {
            type_name: type_name.to_string(),
            bindings: bindings
                .into_iter()
                .map(|(name, e)| (MemberIdentity::new(type_name, name), e))
                .collect(),
        })
    }

    /// A lambda.
    pub fn lambda(parameters: Vec<ExprRef>, body: ExprRef) -> ExprRef {
        Arc::new(Self::Lambda { parameters, body })
    }

    /// A queryable operator call.
    pub fn call(method: QueryMethod, arguments: Vec<ExprRef>) -> ExprRef {
        Arc::new(Self::Call { method, arguments })
    }

    /// A client method call.
    pub fn client_call(name: impl Into<String>, arguments: Vec<ExprRef>, ty: ExprType) -> ExprRef {
        Arc::new(Self::ClientCall {
            name: name.into(),
            arguments,
            ty,
        })
    }

    /// Wraps an extension node.
    pub fn extension(extension: ExtensionExpression) -> ExprRef {
        Arc::new(Self::Extension(extension))
    }

    /// A projection binding placeholder.
    pub fn projection_binding(member: ProjectionMember, ty: ExprType) -> ExprRef {
        Self::extension(ExtensionExpression::ProjectionBinding(
            ProjectionBindingExpression::new(member, ty),
        ))
    }

    /// Returns the static type of the node.
    pub fn ty(&self) -> ExprType {
        match self {
            Self::Constant(ConstantValue::Value(v)) => v
                .scalar_type()
                .map(ExprType::Scalar)
                .unwrap_or(ExprType::Unknown),
            Self::Constant(ConstantValue::EntityQueryable(_)) => ExprType::Queryable,
            Self::Parameter { ty, .. } | Self::Member { ty, .. } | Self::ClientCall { ty, .. } => {
                ty.clone()
            }
            Self::QueryParameter { ty, .. } => ExprType::Scalar(*ty),
            Self::Unary {
                op: UnaryOp::Not, ..
            } => ExprType::Scalar(ScalarType::Bool),
            Self::Unary { operand, .. } => operand.ty(),
            Self::Binary { op, left, .. } => {
                if op.is_comparison() || op.is_logical() {
                    ExprType::Scalar(ScalarType::Bool)
                } else {
                    left.ty()
                }
            }
            Self::Conditional { if_true, if_false, .. } => match if_true.ty() {
                ExprType::Unknown => if_false.ty(),
                ty => ty,
            },
            Self::New { type_name, .. } | Self::MemberInit { type_name, .. } => {
                ExprType::Object(type_name.clone())
            }
            Self::Lambda { body, .. } => body.ty(),
            Self::Call {
                method: QueryMethod::Count,
                ..
            } => ExprType::Scalar(ScalarType::Integer),
            Self::Call { .. } => ExprType::Queryable,
            Self::Extension(ext) => ext.ty(),
        }
    }

    /// Returns the scalar literal, if this is one.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Self::Constant(ConstantValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns true for a null literal.
    pub fn is_null_constant(&self) -> bool {
        matches!(self.as_constant(), Some(Value::Null))
    }

    /// Returns the extension node, if this is one.
    pub fn as_extension(&self) -> Option<&ExtensionExpression> {
        match self {
            Self::Extension(ext) => Some(ext),
            _ => None,
        }
    }

    /// Returns the entity shaper, if this is one.
    pub fn as_entity_shaper(&self) -> Option<&EntityShaperExpression> {
        match self {
            Self::Extension(ExtensionExpression::EntityShaper(shaper)) => Some(shaper),
            _ => None,
        }
    }

    /// Returns the shaped query, if this is one.
    pub fn as_shaped_query(&self) -> Option<&ShapedQueryExpression> {
        match self {
            Self::Extension(ExtensionExpression::ShapedQuery(shaped)) => Some(shaped),
            _ => None,
        }
    }

    /// Splits a lambda into parameters and body.
    pub fn as_lambda(&self) -> Option<(&[ExprRef], &ExprRef)> {
        match self {
            Self::Lambda { parameters, body } => Some((parameters, body)),
            _ => None,
        }
    }

    /// Returns true if any node of the tree is a [`Expression::QueryParameter`].
    pub fn contains_query_parameter(&self) -> bool {
        let mut found = false;
        crate::visitor::for_each_node(self, &mut |e| {
            if matches!(e, Self::QueryParameter { .. }) {
                found = true;
            }
        });
        found
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&ExpressionPrinter::print(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::Property;

    fn blog() -> Arc<EntityType> {
        EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).identity())
            .property(Property::new("Name", ScalarType::Text).nullable())
            .build()
            .unwrap()
    }

    #[test]
    fn property_access_is_typed_from_metadata() {
        let blog = blog();
        let x = Expression::entity_parameter("x", &blog);
        let name = Expression::property(&x, &blog, "Name").unwrap();
        assert_eq!(name.ty(), ExprType::Scalar(ScalarType::Text));
        assert!(Expression::property(&x, &blog, "Missing").is_err());
    }

    #[test]
    fn comparison_is_bool() {
        let e = Expression::equal(Expression::constant(1), Expression::constant(2));
        assert!(e.ty().is_bool());
        let sum = Expression::binary(BinaryOp::Add, Expression::constant(1), Expression::constant(2));
        assert_eq!(sum.ty(), ExprType::Scalar(ScalarType::Integer));
    }

    #[test]
    fn negated_comparisons_pair_up() {
        for op in [
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::LessThan,
            BinaryOp::LessThanOrEqual,
            BinaryOp::GreaterThan,
            BinaryOp::GreaterThanOrEqual,
        ] {
            let negated = op.negate_comparison().unwrap();
            assert_eq!(negated.negate_comparison(), Some(op));
        }
        assert_eq!(BinaryOp::AndAlso.negate_comparison(), None);
    }

    #[test]
    fn field_of_anonymous_object() {
        let obj = Expression::new_object("Anon", [("A", Expression::constant(1))]);
        let a = Expression::field(&obj, "A").unwrap();
        assert_eq!(a.ty(), ExprType::Scalar(ScalarType::Integer));
        assert!(Expression::field(&obj, "B").is_err());
    }

    #[test]
    fn finds_query_parameters() {
        let e = Expression::equal(
            Expression::constant(1),
            Expression::query_parameter("p", ScalarType::Integer),
        );
        assert!(e.contains_query_parameter());
        assert!(!Expression::constant(1).contains_query_parameter());
    }
}
