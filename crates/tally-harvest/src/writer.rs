//! Commits task outcomes into destination tables
//!
//! Store calls are retried here, at the granularity of a single write, with
//! their own budget independent of extraction retries. A write that still fails
//! is reported back as a [`WriteFailure`] and the caller moves on.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::retry::{retry_transient, RetryPolicy};
use crate::store::{CellRef, CellValue, Store, StoreError};
use crate::table::{ExtraCellBinding, ExtraValue, Metric, Snapshot, TableSpec};
use crate::types::{EntityKey, ExtractionResult, Failure};

/// Written in place of data when a key's extraction failed
pub const DEFAULT_ERROR_MARKER: &str = "#FAILED";

/// A write that failed after its retries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteFailure {
    pub key: EntityKey,
    pub table: String,
    pub error: String,
}

pub struct TabularWriter {
    store: Arc<dyn Store>,
    policy: RetryPolicy,
    error_marker: String,
}

impl TabularWriter {
    pub fn new(store: Arc<dyn Store>, policy: RetryPolicy, error_marker: impl Into<String>) -> Self {
        Self {
            store,
            policy,
            error_marker: error_marker.into(),
        }
    }

    pub fn error_marker(&self) -> &str {
        &self.error_marker
    }

    /// Write one key's values, or the error marker, into `row` of `spec`
    pub async fn commit(
        &self,
        spec: &TableSpec,
        row: u32,
        snapshot: Option<&Snapshot>,
        key: &EntityKey,
        result: &Result<ExtractionResult, Failure>,
    ) -> Result<(), WriteFailure> {
        let mut first_error = None;

        for (cell, value) in self.cells_for(spec, row, snapshot, result) {
            let written = self
                .retrying(&spec.name, || {
                    self.store.write_cell(&spec.name, cell, value.clone())
                })
                .await;
            if let Err(e) = written {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                debug!(table = %spec.name, key = %key, row, "Committed");
                Ok(())
            },
            Some(e) => Err(self.failure(key, &spec.name, e)),
        }
    }

    /// Cells a commit touches, in write order
    pub fn cells_for(
        &self,
        spec: &TableSpec,
        row: u32,
        snapshot: Option<&Snapshot>,
        result: &Result<ExtractionResult, Failure>,
    ) -> Vec<(CellRef, CellValue)> {
        let value_of = |metric: &Metric| match result {
            Ok(record) => metric.value(record),
            Err(_) => CellValue::text(self.error_marker.as_str()),
        };

        let snapshot_cell = spec
            .snapshot
            .as_ref()
            .zip(snapshot)
            .map(|(binding, snap)| (CellRef::new(row, snap.column), value_of(&binding.metric)));

        snapshot_cell
            .into_iter()
            .chain(
                spec.fixed
                    .iter()
                    .map(|binding| (CellRef::new(row, binding.column), value_of(&binding.metric))),
            )
            .collect()
    }

    /// Write a key's side-channel cells after a successful commit
    pub async fn write_extra(
        &self,
        binding: &ExtraCellBinding,
        record: &ExtractionResult,
        run_header: &str,
    ) -> Result<(), WriteFailure> {
        let grid: Vec<Vec<CellValue>> = match &binding.value {
            ExtraValue::HeldCounts => record
                .fields
                .iter()
                .map(|f| vec![CellValue::from(f.held_count)])
                .collect(),
            ExtraValue::RunTimestamp => vec![vec![CellValue::text(run_header)]],
            ExtraValue::Metric(metric) => vec![vec![metric.value(record)]],
        };
        if grid.is_empty() {
            return Ok(());
        }

        let bottom = binding.row + grid.len() as u32 - 1;
        let origin = CellRef::new(binding.row, binding.column);
        let table = binding.table.as_str();

        self.retrying(table, || self.ensure_capacity(table, bottom, binding.column))
            .await
            .map_err(|e| self.failure(&binding.key, table, e))?;

        self.retrying(table, || self.store.write_range(table, origin, grid.clone()))
            .await
            .map_err(|e| self.failure(&binding.key, table, e))?;

        debug!(table, key = %binding.key, row = binding.row, column = binding.column, "Wrote extra cells");
        Ok(())
    }

    async fn ensure_capacity(&self, table: &str, rows: u32, cols: u32) -> Result<(), StoreError> {
        let dims = self.store.dimensions(table).await?;
        if rows > dims.rows {
            self.store.grow_rows(table, rows - dims.rows).await?;
        }
        if cols > dims.cols {
            self.store.grow_cols(table, cols - dims.cols).await?;
        }
        Ok(())
    }

    async fn retrying<T, F, Fut>(&self, table: &str, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        retry_transient(self.policy, table, op).await
    }

    fn failure(&self, key: &EntityKey, table: &str, error: StoreError) -> WriteFailure {
        warn!(table, key = %key, error = %error, "Write failed");
        WriteFailure {
            key: key.clone(),
            table: table.to_string(),
            error: error.to_string(),
        }
    }
}
