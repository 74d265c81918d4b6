//! Per-execution query state.

use crate::error::{QueryError, QueryResult};
use crate::in_memory::InMemoryStore;
use entiorm_core::{
    CancellationToken, EntityEntry, EntityType, RelationalConnection, StateManager, Value,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type BufferKey = (String, Vec<Value>);

/// Everything a compiled query needs at execution time: parameter values,
/// the state manager for tracking queries, the store to read from and a
/// cancellation token.
///
/// Buffered no-tracking shapers resolve identity through a per-execution
/// buffer that is cleared whenever an execution starts.
pub struct QueryContext {
    parameters: HashMap<String, Value>,
    state_manager: Arc<StateManager>,
    connection: Option<Arc<dyn RelationalConnection>>,
    store: Option<Arc<InMemoryStore>>,
    cancellation: CancellationToken,
    identity_buffer: Mutex<HashMap<BufferKey, Arc<EntityEntry>>>,
}

impl QueryContext {
    /// Creates a context around a state manager.
    pub fn new(state_manager: Arc<StateManager>) -> Self {
        Self {
            parameters: HashMap::new(),
            state_manager,
            connection: None,
            store: None,
            cancellation: CancellationToken::new(),
            identity_buffer: Mutex::new(HashMap::new()),
        }
    }

    /// Sets a query parameter value.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Sets the connection used by relational queries.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<dyn RelationalConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Sets the store used by in-memory queries.
    #[must_use]
    pub fn with_store(mut self, store: Arc<InMemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Replaces a parameter value between executions.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(name.into(), value.into());
    }

    /// Returns all parameter values.
    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    /// Returns a parameter value.
    pub fn parameter(&self, name: &str) -> QueryResult<&Value> {
        self.parameters
            .get(name)
            .ok_or_else(|| QueryError::MissingParameter {
                name: name.to_string(),
            })
    }

    /// Returns the state manager.
    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Returns the relational connection.
    pub fn connection(&self) -> QueryResult<&Arc<dyn RelationalConnection>> {
        self.connection.as_ref().ok_or_else(|| {
            entiorm_core::CoreError::invalid_operation("query context has no connection").into()
        })
    }

    /// Returns the in-memory store.
    pub fn store(&self) -> QueryResult<&Arc<InMemoryStore>> {
        self.store.as_ref().ok_or_else(|| {
            entiorm_core::CoreError::invalid_operation("query context has no in-memory store")
                .into()
        })
    }

    /// Returns the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn begin_execution(&self) -> QueryResult<()> {
        self.cancellation.check()?;
        self.identity_buffer.lock().clear();
        Ok(())
    }

    /// Returns the instance already materialized for `key` during this
    /// execution, or stores the one produced by `create`.
    pub(crate) fn buffered_entry(
        &self,
        entity_type: &EntityType,
        key: Vec<Value>,
        create: impl FnOnce() -> QueryResult<Arc<EntityEntry>>,
    ) -> QueryResult<Arc<EntityEntry>> {
        let identity = (entity_type.name().to_string(), key);
        if let Some(existing) = self.identity_buffer.lock().get(&identity) {
            return Ok(existing.clone());
        }
        let entry = create()?;
        Ok(self
            .identity_buffer
            .lock()
            .entry(identity)
            .or_insert(entry)
            .clone())
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("parameters", &self.parameters)
            .field("tracked", &self.state_manager.len())
            .field("has_connection", &self.connection.is_some())
            .field("has_store", &self.store.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_core::{EntityState, Property, ScalarType};

    #[test]
    fn missing_parameter_is_an_error() {
        let ctx = QueryContext::new(Arc::new(StateManager::new())).with_parameter("p", 3);
        assert_eq!(ctx.parameter("p").unwrap(), &Value::Integer(3));
        assert!(matches!(
            ctx.parameter("q").unwrap_err(),
            QueryError::MissingParameter { name } if name == "q"
        ));
    }

    #[test]
    fn identity_buffer_is_reset_per_execution() {
        let et = EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).key())
            .build()
            .unwrap();
        let ctx = QueryContext::new(Arc::new(StateManager::new()));
        let make = || Ok(Arc::new(EntityEntry::new(et.clone(), vec![Value::Integer(1)], EntityState::Detached)));

        let first = ctx.buffered_entry(&et, vec![Value::Integer(1)], make).unwrap();
        let second = ctx.buffered_entry(&et, vec![Value::Integer(1)], make).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        ctx.begin_execution().unwrap();
        let third = ctx.buffered_entry(&et, vec![Value::Integer(1)], make).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn missing_store_is_reported() {
        let ctx = QueryContext::new(Arc::new(StateManager::new()));
        assert!(ctx.store().is_err());
        assert!(ctx.connection().is_err());
    }
}
