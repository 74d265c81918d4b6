//! Batch configuration.

use crate::error::{UpdateError, UpdateResult};
use entiorm_core::Config;

/// How the store positions a reader over the results of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderPositioning {
    /// Only statements that return rows produce a result set.
    #[default]
    ResultSetsOnly,
    /// Every statement produces one result, with or without rows.
    ResultPerStatement,
}

/// Limits and switches for one provider's batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum number of commands in one batch.
    pub max_batch_size: usize,
    /// A batch must stay below this many parameters.
    pub max_parameter_count: usize,
    /// Group consecutive compatible inserts into one statement.
    pub bulk_insert: bool,
    /// Reader positioning of the provider.
    pub positioning: ReaderPositioning,
}

impl BatchOptions {
    /// Creates options with the given limits; both must be positive.
    pub fn new(max_batch_size: usize, max_parameter_count: usize) -> UpdateResult<Self> {
        if max_batch_size == 0 {
            return Err(UpdateError::invalid_argument(
                "max batch size must be positive",
            ));
        }
        if max_parameter_count == 0 {
            return Err(UpdateError::invalid_argument(
                "max parameter count must be positive",
            ));
        }
        Ok(Self {
            max_batch_size,
            max_parameter_count,
            bulk_insert: true,
            positioning: ReaderPositioning::ResultSetsOnly,
        })
    }

    /// Derives options from the shared configuration.
    pub fn from_config(config: &Config) -> UpdateResult<Self> {
        Ok(Self::new(config.max_batch_size, config.max_parameter_count)?
            .with_bulk_insert(config.bulk_insert))
    }

    /// Enables or disables grouped inserts.
    #[must_use]
    pub fn with_bulk_insert(mut self, enabled: bool) -> Self {
        self.bulk_insert = enabled;
        self
    }

    /// Sets the reader positioning.
    #[must_use]
    pub fn with_positioning(mut self, positioning: ReaderPositioning) -> Self {
        self.positioning = positioning;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        let config = Config::default();
        Self {
            max_batch_size: config.max_batch_size,
            max_parameter_count: config.max_parameter_count,
            bulk_insert: config.bulk_insert,
            positioning: ReaderPositioning::ResultSetsOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_from_config() {
        let config = Config::new()
            .max_batch_size(3)
            .max_parameter_count(10)
            .bulk_insert(false);
        let options = BatchOptions::from_config(&config).unwrap();
        assert_eq!(options.max_batch_size, 3);
        assert_eq!(options.max_parameter_count, 10);
        assert!(!options.bulk_insert);
        assert_eq!(options.positioning, ReaderPositioning::ResultSetsOnly);
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(BatchOptions::new(0, 10).is_err());
        assert!(BatchOptions::new(10, 0).is_err());
        assert!(BatchOptions::from_config(&Config::new().max_batch_size(0)).is_err());
    }

    #[test]
    fn defaults_match_config_defaults() {
        let options = BatchOptions::default();
        assert_eq!(options.max_batch_size, 42);
        assert_eq!(options.max_parameter_count, 2100);
        assert!(options.bulk_insert);
    }
}
