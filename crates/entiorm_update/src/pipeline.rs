//! Saving tracked entries.

use crate::batch::ModificationCommandBatch;
use crate::config::BatchOptions;
use crate::error::UpdateResult;
use crate::preparer::CommandBatchPreparer;
use crate::sql_generator::{
    ReturningUpdateSqlGenerator, SqlServerUpdateSqlGenerator, UpdateSqlGenerator,
};
use entiorm_core::{
    CancellationToken, Config, EntityState, RelationalConnection, StateManager, UpdateEntry,
    Value,
};
use std::cmp::Ordering;
use std::sync::Arc;

/// Saves entries batch by batch.
///
/// Store-generated values read during a save are committed onto the
/// entries only after every batch succeeded; a failure discards them and
/// leaves every entry in its previous state.
#[derive(Debug, Clone)]
pub struct UpdatePipeline {
    preparer: CommandBatchPreparer,
}

impl UpdatePipeline {
    /// Creates a pipeline for a dialect.
    pub fn new(generator: Arc<dyn UpdateSqlGenerator>, options: BatchOptions) -> Self {
        Self {
            preparer: CommandBatchPreparer::new(generator, options),
        }
    }

    /// A SQL Server pipeline configured from `config`.
    pub fn sql_server(config: &Config) -> UpdateResult<Self> {
        Ok(Self::new(
            Arc::new(SqlServerUpdateSqlGenerator::new()),
            BatchOptions::from_config(config)?,
        ))
    }

    /// A `RETURNING` pipeline configured from `config`.
    pub fn returning(config: &Config) -> UpdateResult<Self> {
        Ok(Self::new(
            Arc::new(ReturningUpdateSqlGenerator::new()),
            BatchOptions::from_config(config)?,
        ))
    }

    /// Returns the batch preparer.
    pub fn preparer(&self) -> &CommandBatchPreparer {
        &self.preparer
    }

    /// Saves `entries` and returns how many were written.
    pub fn save_changes(
        &self,
        entries: &[Arc<dyn UpdateEntry>],
        connection: &dyn RelationalConnection,
    ) -> UpdateResult<usize> {
        let saved = saved_entries(entries);
        let outcome = self.preparer.prepare(&saved).and_then(|batches| {
            for mut batch in batches {
                batch.execute(connection)?;
            }
            Ok(())
        });
        finish(&saved, outcome)
    }

    /// Asynchronous [`UpdatePipeline::save_changes`].
    pub async fn save_changes_async(
        &self,
        entries: &[Arc<dyn UpdateEntry>],
        connection: &dyn RelationalConnection,
        cancellation: &CancellationToken,
    ) -> UpdateResult<usize> {
        let saved = saved_entries(entries);
        let outcome = match self.preparer.prepare(&saved) {
            Ok(batches) => execute_all_async(batches, connection, cancellation).await,
            Err(e) => Err(e),
        };
        finish(&saved, outcome)
    }

    /// Saves every pending entry of a state manager.
    ///
    /// Entries are saved grouped by entity type, ordered by key.
    pub fn save_state_manager(
        &self,
        state_manager: &StateManager,
        connection: &dyn RelationalConnection,
    ) -> UpdateResult<usize> {
        self.save_changes(&pending_entries(state_manager), connection)
    }

    /// Asynchronous [`UpdatePipeline::save_state_manager`].
    pub async fn save_state_manager_async(
        &self,
        state_manager: &StateManager,
        connection: &dyn RelationalConnection,
        cancellation: &CancellationToken,
    ) -> UpdateResult<usize> {
        let entries = pending_entries(state_manager);
        self.save_changes_async(&entries, connection, cancellation)
            .await
    }
}

async fn execute_all_async(
    batches: Vec<ModificationCommandBatch>,
    connection: &dyn RelationalConnection,
    cancellation: &CancellationToken,
) -> UpdateResult<()> {
    for mut batch in batches {
        batch.execute_async(connection, cancellation).await?;
    }
    Ok(())
}

fn saved_entries(entries: &[Arc<dyn UpdateEntry>]) -> Vec<Arc<dyn UpdateEntry>> {
    entries
        .iter()
        .filter(|e| {
            matches!(
                e.entity_state(),
                EntityState::Added | EntityState::Modified | EntityState::Deleted
            )
        })
        .cloned()
        .collect()
}

fn finish(entries: &[Arc<dyn UpdateEntry>], outcome: UpdateResult<()>) -> UpdateResult<usize> {
    match outcome {
        Ok(()) => {
            for entry in entries {
                entry.accept_store_generated_values();
                entry.accept_changes();
            }
            tracing::debug!(entries = entries.len(), "saved changes");
            Ok(entries.len())
        }
        Err(e) => {
            for entry in entries {
                entry.discard_store_generated_values();
            }
            tracing::debug!(error = %e, "save failed, discarded store-generated values");
            Err(e)
        }
    }
}

fn pending_entries(state_manager: &StateManager) -> Vec<Arc<dyn UpdateEntry>> {
    let mut entries = state_manager.entries();
    entries.sort_by(|a, b| {
        a.entity_type()
            .name()
            .cmp(b.entity_type().name())
            .then_with(|| compare_keys(&a.key_values(), &b.key_values()))
    });
    entries
        .into_iter()
        .map(|e| e as Arc<dyn UpdateEntry>)
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.sort_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}
