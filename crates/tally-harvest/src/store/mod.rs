//! Tabular store contract
//!
//! The engine talks to the physical table service only through [`Store`]. All
//! addressing is 1-based; capacity must be grown before writing past it, and
//! implementations reject out-of-bounds writes instead of silently growing.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::MemoryStore;

/// A single cell's content
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Blank or whitespace-only text both count as empty
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Trimmed textual form, `None` when empty
    pub fn as_key_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) if s.trim().is_empty() => None,
            CellValue::Text(s) => Some(s.trim().to_string()),
            CellValue::Number(n) => Some(n.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for CellValue {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

/// 1-based cell address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Inclusive 1-based rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
}

impl Rect {
    pub fn row(row: u32, left: u32, right: u32) -> Self {
        Self {
            top: row,
            left,
            bottom: row,
            right,
        }
    }
}

/// Current row/column capacity of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub rows: u32,
    pub cols: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("out of bounds in '{table}': row {row}, column {col} exceeds {rows}x{cols}")]
    OutOfBounds {
        table: String,
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Range read/write primitives of the shared tabular store
#[async_trait]
pub trait Store: Send + Sync {
    async fn dimensions(&self, table: &str) -> Result<Dimensions, StoreError>;

    /// Every cell of column `col`, index 0 being row 1
    async fn read_column(&self, table: &str, col: u32) -> Result<Vec<CellValue>, StoreError>;

    async fn read_range(&self, table: &str, rect: Rect) -> Result<Vec<Vec<CellValue>>, StoreError>;

    async fn write_cell(&self, table: &str, cell: CellRef, value: CellValue) -> Result<(), StoreError>;

    /// Write a grid whose top-left corner lands on `origin`
    async fn write_range(
        &self,
        table: &str,
        origin: CellRef,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), StoreError>;

    async fn grow_rows(&self, table: &str, n: u32) -> Result<(), StoreError>;

    async fn grow_cols(&self, table: &str, n: u32) -> Result<(), StoreError>;

    /// Add one row after the current capacity and fill it from column 1
    ///
    /// Returns the new row's index.
    async fn append_row(&self, table: &str, values: Vec<CellValue>) -> Result<u32, StoreError> {
        let dims = self.dimensions(table).await?;
        let width = u32::try_from(values.len()).unwrap_or(u32::MAX);
        if width > dims.cols {
            self.grow_cols(table, width - dims.cols).await?;
        }
        self.grow_rows(table, 1).await?;

        let row = dims.rows + 1;
        if !values.is_empty() {
            self.write_range(table, CellRef::new(row, 1), vec![values]).await?;
        }
        Ok(row)
    }
}
