//! Per-run snapshot column allocation

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_common::TallyError;
use tracing::{debug, info};

use super::TableSpec;
use crate::store::{CellRef, CellValue, Rect, Store, StoreError};

/// +05:30
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

pub const DEFAULT_HEADER_FORMAT: &str = "%Y-%m-%d %I:%M %p";

/// One run's column in one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub table: String,
    pub column: u32,
    pub header: String,
    pub taken_at: DateTime<Utc>,
}

/// Renders snapshot headers in a fixed local offset
#[derive(Debug, Clone)]
pub struct SnapshotClock {
    offset: FixedOffset,
    format: String,
}

impl SnapshotClock {
    pub fn new(utc_offset_minutes: i32, format: impl Into<String>) -> tally_common::Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                TallyError::config(format!("UTC offset out of range: {} minutes", utc_offset_minutes))
            })?;
        Ok(Self {
            offset,
            format: format.into(),
        })
    }

    pub fn header(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format(&self.format).to_string()
    }
}

/// Allocates exactly one new column per table per run
pub struct SnapshotColumnAllocator {
    store: Arc<dyn Store>,
    clock: SnapshotClock,
}

impl SnapshotColumnAllocator {
    pub fn new(store: Arc<dyn Store>, clock: SnapshotClock) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &SnapshotClock {
        &self.clock
    }

    /// Claim the column after the last used header cell and stamp it
    ///
    /// The column is never left of `first_column`, so fixed layout columns
    /// are not taken over by the first snapshot of an empty table.
    pub async fn allocate(
        &self,
        spec: &TableSpec,
        first_column: u32,
        at: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError> {
        let dims = self.store.dimensions(&spec.name).await?;

        let last_used = if dims.cols > 0 && dims.rows >= spec.header_row {
            let header = self
                .store
                .read_range(&spec.name, Rect::row(spec.header_row, 1, dims.cols))
                .await?;
            header
                .first()
                .and_then(|cells| cells.iter().rposition(|c| !c.is_empty()))
                .map(|idx| idx as u32 + 1)
                .unwrap_or(0)
        } else {
            0
        };

        let column = (last_used + 1).max(first_column);

        if column > dims.cols {
            let deficit = column - dims.cols;
            self.store.grow_cols(&spec.name, deficit).await?;
            debug!(table = %spec.name, cols = deficit, "Grew column capacity");
        }
        if spec.header_row > dims.rows {
            self.store
                .grow_rows(&spec.name, spec.header_row - dims.rows)
                .await?;
        }

        let header = self.clock.header(at);
        self.store
            .write_cell(
                &spec.name,
                CellRef::new(spec.header_row, column),
                CellValue::text(header.clone()),
            )
            .await?;

        info!(table = %spec.name, column, header = %header, "Allocated snapshot column");

        Ok(Snapshot {
            table: spec.name.clone(),
            column,
            header,
            taken_at: at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::table::Metric;
    use chrono::TimeZone;

    fn clock() -> SnapshotClock {
        SnapshotClock::new(DEFAULT_UTC_OFFSET_MINUTES, DEFAULT_HEADER_FORMAT).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 4, 0, 0).unwrap()
    }

    #[test]
    fn test_header_in_local_offset() {
        assert_eq!(clock().header(at()), "2024-03-05 09:30 AM");
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(SnapshotClock::new(24 * 60, DEFAULT_HEADER_FORMAT).is_err());
    }

    #[tokio::test]
    async fn test_first_snapshot_respects_first_column() {
        let store = Arc::new(MemoryStore::new().with_table("T", 5, 1));
        store
            .write_cell("T", CellRef::new(1, 1), CellValue::text("Roll No"))
            .await
            .unwrap();
        let spec = TableSpec::new("T").with_snapshot(3, Metric::OverallPercentage);

        let allocator = SnapshotColumnAllocator::new(store.clone(), clock());
        let snapshot = allocator.allocate(&spec, 3, at()).await.unwrap();

        assert_eq!(snapshot.column, 3);
        assert_eq!(store.dimensions("T").await.unwrap().cols, 3);
        assert_eq!(
            store.cell("T", CellRef::new(1, 3)).await,
            Some(CellValue::text("2024-03-05 09:30 AM"))
        );
    }

    #[tokio::test]
    async fn test_successive_runs_strictly_increase() {
        let store = Arc::new(MemoryStore::new().with_table("T", 5, 4));
        let spec = TableSpec::new("T");
        let allocator = SnapshotColumnAllocator::new(store.clone(), clock());

        let mut previous = 0;
        for _ in 0..3 {
            let snapshot = allocator.allocate(&spec, 2, at()).await.unwrap();
            assert!(snapshot.column > previous);
            previous = snapshot.column;
        }
        assert_eq!(previous, 4);
        assert_eq!(store.dimensions("T").await.unwrap().cols, 4);
    }

    #[tokio::test]
    async fn test_header_row_below_capacity_is_grown() {
        let store = Arc::new(MemoryStore::new().with_table("T", 0, 0));
        let spec = TableSpec::new("T").with_key_rows(10, 27);
        let allocator = SnapshotColumnAllocator::new(store.clone(), clock());

        let snapshot = allocator.allocate(&spec, 3, at()).await.unwrap();
        assert_eq!(snapshot.column, 3);
        assert_eq!(store.dimensions("T").await.unwrap().rows, 10);
    }
}
