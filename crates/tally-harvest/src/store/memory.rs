//! In-process store
//!
//! Dense grids with explicit capacity. Backs tests and the JSON file store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{CellRef, CellValue, Dimensions, Rect, Store, StoreError};

/// One table's cells, `cells[row - 1][col - 1]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
    pub cells: Vec<Vec<CellValue>>,
}

impl Grid {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            cells: vec![vec![CellValue::Empty; cols as usize]; rows as usize],
        }
    }

    fn check(&self, table: &str, row: u32, col: u32) -> Result<(), StoreError> {
        if row == 0 || col == 0 || row > self.rows || col > self.cols {
            return Err(StoreError::OutOfBounds {
                table: table.to_string(),
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    fn get(&self, row: u32, col: u32) -> CellValue {
        self.cells
            .get(row as usize - 1)
            .and_then(|r| r.get(col as usize - 1))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if let Some(cell) = self
            .cells
            .get_mut(row as usize - 1)
            .and_then(|r| r.get_mut(col as usize - 1))
        {
            *cell = value;
        }
    }

    // Loaded snapshots may carry ragged rows; pad them to capacity.
    fn normalize(&mut self) {
        self.cells.resize(self.rows as usize, Vec::new());
        for row in &mut self.cells {
            row.resize(self.cols as usize, CellValue::Empty);
        }
    }
}

/// Serializable image of every table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub tables: BTreeMap<String, Grid>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Grid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style table registration
    pub fn with_table(mut self, name: impl Into<String>, rows: u32, cols: u32) -> Self {
        self.tables.get_mut().insert(name.into(), Grid::new(rows, cols));
        self
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut tables = snapshot.tables;
        for grid in tables.values_mut() {
            grid.normalize();
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            tables: self.tables.read().await.clone(),
        }
    }

    pub async fn add_table(&self, name: impl Into<String>, rows: u32, cols: u32) {
        self.tables.write().await.insert(name.into(), Grid::new(rows, cols));
    }

    /// Read one cell without bounds errors (`None` for unknown tables or cells)
    pub async fn cell(&self, table: &str, cell: CellRef) -> Option<CellValue> {
        let tables = self.tables.read().await;
        let grid = tables.get(table)?;
        grid.check(table, cell.row, cell.col).ok()?;
        Some(grid.get(cell.row, cell.col))
    }
}

fn not_found(table: &str) -> StoreError {
    StoreError::TableNotFound(table.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn dimensions(&self, table: &str) -> Result<Dimensions, StoreError> {
        let tables = self.tables.read().await;
        let grid = tables.get(table).ok_or_else(|| not_found(table))?;
        Ok(Dimensions {
            rows: grid.rows,
            cols: grid.cols,
        })
    }

    async fn read_column(&self, table: &str, col: u32) -> Result<Vec<CellValue>, StoreError> {
        let tables = self.tables.read().await;
        let grid = tables.get(table).ok_or_else(|| not_found(table))?;
        if grid.rows == 0 {
            return Ok(Vec::new());
        }
        grid.check(table, 1, col)?;
        Ok((1..=grid.rows).map(|row| grid.get(row, col)).collect())
    }

    async fn read_range(&self, table: &str, rect: Rect) -> Result<Vec<Vec<CellValue>>, StoreError> {
        let tables = self.tables.read().await;
        let grid = tables.get(table).ok_or_else(|| not_found(table))?;
        grid.check(table, rect.top, rect.left)?;
        grid.check(table, rect.bottom, rect.right)?;

        Ok((rect.top..=rect.bottom)
            .map(|row| (rect.left..=rect.right).map(|col| grid.get(row, col)).collect())
            .collect())
    }

    async fn write_cell(&self, table: &str, cell: CellRef, value: CellValue) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let grid = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        grid.check(table, cell.row, cell.col)?;
        grid.set(cell.row, cell.col, value);
        Ok(())
    }

    async fn write_range(
        &self,
        table: &str,
        origin: CellRef,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let grid = tables.get_mut(table).ok_or_else(|| not_found(table))?;

        let height = values.len() as u32;
        let width = values.iter().map(Vec::len).max().unwrap_or(0) as u32;
        if height == 0 || width == 0 {
            return Ok(());
        }
        // Validate the whole rectangle before touching anything.
        grid.check(table, origin.row, origin.col)?;
        grid.check(table, origin.row + height - 1, origin.col + width - 1)?;

        for (dr, row) in values.into_iter().enumerate() {
            for (dc, value) in row.into_iter().enumerate() {
                grid.set(origin.row + dr as u32, origin.col + dc as u32, value);
            }
        }
        Ok(())
    }

    async fn grow_rows(&self, table: &str, n: u32) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let grid = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        let cols = grid.cols as usize;
        grid.cells
            .extend((0..n).map(|_| vec![CellValue::Empty; cols]));
        grid.rows += n;
        Ok(())
    }

    async fn grow_cols(&self, table: &str, n: u32) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let grid = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        grid.cols += n;
        let cols = grid.cols as usize;
        for row in &mut grid.cells {
            row.resize(cols, CellValue::Empty);
        }
        Ok(())
    }
}
