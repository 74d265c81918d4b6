//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use entiorm_core::{EntityState, ScalarType, Value};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for scalar types.
pub fn scalar_type_strategy() -> impl Strategy<Value = ScalarType> {
    prop_oneof![
        Just(ScalarType::Bool),
        Just(ScalarType::Integer),
        Just(ScalarType::Text),
        Just(ScalarType::Bytes),
        Just(ScalarType::Guid),
    ]
}

/// Strategy for non-null values of any scalar type.
pub fn non_null_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
        prop::array::uniform16(any::<u8>()).prop_map(|b| Value::Guid(Uuid::from_bytes(b))),
    ]
}

/// Strategy for values, null included.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        6 => non_null_value_strategy(),
    ]
}

/// Strategy for identifiers usable as table, column or member names.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for identifiers that may contain the `]` quote character.
pub fn quoted_identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z\\]\\[ ][A-Za-z0-9_\\]]{0,15}").expect("Invalid regex")
}

/// Strategy for states the update pipeline saves.
pub fn saved_state_strategy() -> impl Strategy<Value = EntityState> {
    prop_oneof![
        Just(EntityState::Added),
        Just(EntityState::Modified),
        Just(EntityState::Deleted),
    ]
}

/// Strategy for rows of a fixed width.
pub fn row_strategy(width: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(value_strategy(), width)
}
