//! Pipeline configuration.

/// Default tracking behavior applied to queries that do not state one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTrackingBehavior {
    /// Materialized entities are registered with the state manager.
    TrackAll,
    /// Materialized entities are returned detached.
    NoTracking,
}

/// Configuration shared by the query and update pipelines.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of modification commands in one batch.
    pub max_batch_size: usize,

    /// Maximum number of parameters a single batch may carry.
    pub max_parameter_count: usize,

    /// Whether consecutive compatible inserts are grouped into one statement.
    pub bulk_insert: bool,

    /// Tracking behavior for queries without an explicit `AsTracking`/`AsNoTracking`.
    pub default_tracking: QueryTrackingBehavior,

    /// Maximum number of compiled queries kept in the query cache.
    pub query_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_batch_size: 42,
            max_parameter_count: 2100,
            bulk_insert: true,
            default_tracking: QueryTrackingBehavior::TrackAll,
            query_cache_capacity: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of commands per batch.
    #[must_use]
    pub const fn max_batch_size(mut self, value: usize) -> Self {
        self.max_batch_size = value;
        self
    }

    /// Sets the maximum number of parameters per batch.
    #[must_use]
    pub const fn max_parameter_count(mut self, value: usize) -> Self {
        self.max_parameter_count = value;
        self
    }

    /// Enables or disables grouped inserts.
    #[must_use]
    pub const fn bulk_insert(mut self, value: bool) -> Self {
        self.bulk_insert = value;
        self
    }

    /// Sets the default query tracking behavior.
    #[must_use]
    pub const fn default_tracking(mut self, value: QueryTrackingBehavior) -> Self {
        self.default_tracking = value;
        self
    }

    /// Sets the compiled query cache capacity.
    #[must_use]
    pub const fn query_cache_capacity(mut self, value: usize) -> Self {
        self.query_cache_capacity = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_batch_size, 42);
        assert_eq!(config.max_parameter_count, 2100);
        assert!(config.bulk_insert);
        assert_eq!(config.default_tracking, QueryTrackingBehavior::TrackAll);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_batch_size(1)
            .bulk_insert(false)
            .default_tracking(QueryTrackingBehavior::NoTracking);

        assert_eq!(config.max_batch_size, 1);
        assert!(!config.bulk_insert);
        assert_eq!(config.default_tracking, QueryTrackingBehavior::NoTracking);
    }
}
