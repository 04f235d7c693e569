//! Key to row association for one destination table

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::TableSpec;
use crate::retry::{retry_transient, RetryPolicy};
use crate::store::{CellRef, CellValue, Store, StoreError};
use crate::types::EntityKey;

/// In-memory row map built from a table's key column
///
/// The first occurrence of a key wins; later duplicates already in the table
/// are ignored so the map stays injective.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMap {
    rows: HashMap<EntityKey, u32>,
    next_free: u32,
}

impl RowMap {
    /// Build from a full key column (index 0 = row 1), ignoring the header region
    pub fn from_column(column: &[CellValue], first_key_row: u32) -> Self {
        let mut rows = HashMap::new();
        let mut last_used = first_key_row.saturating_sub(1);

        for (idx, cell) in column.iter().enumerate() {
            let row = idx as u32 + 1;
            if row < first_key_row {
                continue;
            }
            if let Some(text) = cell.as_key_text() {
                rows.entry(EntityKey::new(text)).or_insert(row);
                last_used = row;
            }
        }

        Self {
            rows,
            next_free: last_used + 1,
        }
    }

    pub fn get(&self, key: &EntityKey) -> Option<u32> {
        self.rows.get(key).copied()
    }

    /// Row the next unseen key will occupy
    pub fn next_free(&self) -> u32 {
        self.next_free
    }

    /// Record `key` at the next free row, or return its existing row
    pub fn assign(&mut self, key: &EntityKey) -> u32 {
        if let Some(row) = self.get(key) {
            return row;
        }
        let row = self.next_free;
        self.rows.insert(key.clone(), row);
        self.next_free += 1;
        row
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&EntityKey, u32)> {
        self.rows.iter().map(|(k, r)| (k, *r))
    }
}

#[derive(Debug)]
struct MapperState {
    map: RowMap,
    capacity: u32,
}

/// Serialized row resolution against the store
///
/// Every call takes the same lock, so two unseen keys can never be handed the
/// same appended row and a repeated unseen key reuses its first allocation.
/// Store calls made while appending are retried on transient errors.
pub struct RowMapper {
    store: Arc<dyn Store>,
    table: String,
    key_column: u32,
    policy: RetryPolicy,
    state: Mutex<MapperState>,
}

impl RowMapper {
    /// Read the table's key column once and build the map
    pub async fn load(store: Arc<dyn Store>, spec: &TableSpec, policy: RetryPolicy) -> Result<Self, StoreError> {
        let dims = store.dimensions(&spec.name).await?;
        let column = if dims.cols >= spec.key_column {
            store.read_column(&spec.name, spec.key_column).await?
        } else {
            Vec::new()
        };
        let map = RowMap::from_column(&column, spec.first_key_row);

        info!(
            table = %spec.name,
            keys = map.len(),
            next_free = map.next_free(),
            capacity = dims.rows,
            "Built row map"
        );

        Ok(Self {
            store,
            table: spec.name.clone(),
            key_column: spec.key_column,
            policy,
            state: Mutex::new(MapperState {
                map,
                capacity: dims.rows,
            }),
        })
    }

    /// Row for `key`, appending one when unseen
    pub async fn resolve(&self, key: &EntityKey) -> Result<u32, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.map.get(key) {
            return Ok(row);
        }

        let row = state.map.next_free();
        if row > state.capacity {
            // Other writers (header, extra cells) may have grown the table since load.
            let table = self.table.as_str();
            state.capacity = retry_transient(self.policy, table, || self.store.dimensions(table))
                .await?
                .rows;
        }
        if row > state.capacity {
            let deficit = row - state.capacity;
            let table = self.table.as_str();
            retry_transient(self.policy, table, || self.store.grow_rows(table, deficit)).await?;
            state.capacity = row;
            debug!(table = %self.table, rows = deficit, "Grew row capacity");
        }

        let cell = CellRef::new(row, self.key_column);
        retry_transient(self.policy, &self.table, || {
            self.store
                .write_cell(&self.table, cell, CellValue::text(key.as_str()))
        })
        .await?;
        state.map.assign(key);

        debug!(table = %self.table, key = %key, row, "Appended key row");
        Ok(row)
    }

    /// Copy of the current mapping
    pub async fn snapshot(&self) -> RowMap {
        self.state.lock().await.map.clone()
    }
}
