//! GUID generation.

use crate::error::CoreResult;
use crate::value::Value;
use crate::value_generation::ValueGenerator;
use uuid::Uuid;

/// Generates random (v4) GUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuidValueGenerator;

impl ValueGenerator for GuidValueGenerator {
    fn next_value(&self) -> CoreResult<Value> {
        Ok(Value::Guid(Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn values_are_distinct() {
        let generator = GuidValueGenerator;
        let values: HashSet<Value> = (0..100).map(|_| generator.next_value().unwrap()).collect();
        assert_eq!(values.len(), 100);
    }
}
