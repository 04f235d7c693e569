//! Run coordination
//!
//! One run: build every table's row map, allocate one snapshot column per
//! table, then stream batches from the scheduler and commit each batch's
//! outcomes before the next batch starts. Only store failures during row map
//! construction, column allocation or row resolution (after its transient
//! retries) abort the run; extraction and write failures are counted and the
//! run carries on.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::extract::Extractor;
use crate::retry::{RetryPolicy, RetryingTaskRunner};
use crate::scheduler::{Batch, BatchScheduler};
use crate::store::{Store, StoreError};
use crate::summary::RunSummary;
use crate::table::{ExtraCellBinding, RowMapper, Snapshot, SnapshotColumnAllocator, TableSpec};
use crate::types::{EntityKey, TaskOutcome};
use crate::writer::TabularWriter;

/// Conditions that end a run early
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to prepare table '{table}': {source}")]
    TableSetup {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to allocate snapshot column in '{table}': {source}")]
    SnapshotAllocation {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to resolve row for {key} in '{table}': {source}")]
    RowResolution {
        table: String,
        key: EntityKey,
        #[source]
        source: StoreError,
    },
}

/// Run-scoped state for one destination table
struct TableRun {
    spec: TableSpec,
    rows: RowMapper,
    snapshot: Option<Snapshot>,
}

pub struct RunCoordinator {
    store: Arc<dyn Store>,
    scheduler: BatchScheduler,
    writer: TabularWriter,
    write_policy: RetryPolicy,
    allocator: SnapshotColumnAllocator,
    tables: Vec<TableSpec>,
    extra_cells: Vec<ExtraCellBinding>,
}

impl RunCoordinator {
    pub fn new(
        config: &HarvestConfig,
        store: Arc<dyn Store>,
        extractor: Arc<dyn Extractor>,
    ) -> tally_common::Result<Self> {
        let runner = RetryingTaskRunner::new(
            extractor,
            config.retry.policy(),
            config.retry.attempt_timeout(),
        );
        let scheduler = BatchScheduler::new(
            Arc::new(runner),
            config.scheduler.concurrency_limit,
            config.scheduler.batch_delay(),
        );
        let writer = TabularWriter::new(
            Arc::clone(&store),
            config.writer.policy(),
            config.writer.error_marker.clone(),
        );
        let allocator = SnapshotColumnAllocator::new(Arc::clone(&store), config.snapshot.clock()?);

        Ok(Self {
            store,
            scheduler,
            writer,
            write_policy: config.writer.policy(),
            allocator,
            tables: config.tables.clone(),
            extra_cells: config.extra_cells.clone(),
        })
    }

    pub async fn run(&self, keys: Vec<EntityKey>) -> Result<RunSummary, RunError> {
        self.run_with(keys, |_| {}).await
    }

    /// Execute a run, calling `on_batch` after each batch is committed
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn run_with<F>(&self, keys: Vec<EntityKey>, mut on_batch: F) -> Result<RunSummary, RunError>
    where
        F: FnMut(&Batch) + Send,
    {
        let started_at = Utc::now();
        let mut summary = RunSummary::new(Uuid::new_v4(), started_at, keys.len());
        info!(
            run_id = %summary.run_id,
            batches = self.scheduler.batch_count(keys.len()),
            concurrency = self.scheduler.concurrency_limit(),
            "Starting run"
        );

        let mut tables = Vec::with_capacity(self.tables.len());
        for spec in &self.tables {
            tables.push(self.prepare(spec, started_at).await?);
        }
        summary.snapshots = tables.iter().filter_map(|t| t.snapshot.clone()).collect();
        let run_header = self.allocator.clock().header(started_at);

        let mut batches = Box::pin(self.scheduler.batches(keys));
        while let Some(batch) = batches.next().await {
            for outcome in &batch.outcomes {
                self.commit(&tables, outcome, &run_header, &mut summary).await?;
                summary.record(outcome);
            }
            summary.batches += 1;
            on_batch(&batch);
        }

        summary.complete(Utc::now());
        info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            write_failures = summary.write_failures.len(),
            duration_secs = summary.duration_secs,
            "Run complete"
        );
        Ok(summary)
    }

    async fn prepare(&self, spec: &TableSpec, at: chrono::DateTime<Utc>) -> Result<TableRun, RunError> {
        let setup = |source: StoreError| RunError::TableSetup {
            table: spec.name.clone(),
            source,
        };

        let dims = self.store.dimensions(&spec.name).await.map_err(setup)?;
        let required = spec.required_columns();
        if required > dims.cols {
            self.store
                .grow_cols(&spec.name, required - dims.cols)
                .await
                .map_err(setup)?;
        }

        let snapshot = match spec.snapshot {
            Some(ref binding) => Some(
                self.allocator
                    .allocate(spec, binding.first_column, at)
                    .await
                    .map_err(|source| RunError::SnapshotAllocation {
                        table: spec.name.clone(),
                        source,
                    })?,
            ),
            None => None,
        };

        // After allocation, so the mapper sees the rows the header needed
        let rows = RowMapper::load(Arc::clone(&self.store), spec, self.write_policy)
            .await
            .map_err(setup)?;

        Ok(TableRun {
            spec: spec.clone(),
            rows,
            snapshot,
        })
    }

    async fn commit(
        &self,
        tables: &[TableRun],
        outcome: &TaskOutcome,
        run_header: &str,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let key = outcome.key();

        for table in tables {
            let row = table
                .rows
                .resolve(key)
                .await
                .map_err(|source| RunError::RowResolution {
                    table: table.spec.name.clone(),
                    key: key.clone(),
                    source,
                })?;

            if let Err(failure) = self
                .writer
                .commit(&table.spec, row, table.snapshot.as_ref(), key, &outcome.result)
                .await
            {
                summary.write_failures.push(failure);
            }
        }

        let Ok(ref record) = outcome.result else {
            return Ok(());
        };
        for binding in self.extra_cells.iter().filter(|b| &b.key == key) {
            if let Err(failure) = self.writer.write_extra(binding, record, run_header).await {
                warn!(key = %key, table = %binding.table, "Extra cell write failed");
                summary.write_failures.push(failure);
            }
        }
        Ok(())
    }
}
