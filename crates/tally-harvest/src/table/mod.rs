//! Destination table layouts
//!
//! A [`TableSpec`] says where keys live and which values of an
//! [`ExtractionResult`] land in which columns. Layouts are pure configuration;
//! nothing in the writer knows about particular sheets.

pub mod row_map;
pub mod snapshot;

use serde::{Deserialize, Serialize};

use crate::store::CellValue;
use crate::types::{EntityKey, ExtractionResult};

pub use row_map::{RowMap, RowMapper};
pub use snapshot::{Snapshot, SnapshotClock, SnapshotColumnAllocator};

fn default_header_row() -> u32 {
    1
}

fn default_key_column() -> u32 {
    1
}

fn default_first_key_row() -> u32 {
    2
}

/// Value selected from an extraction result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum Metric {
    OverallPercentage,
    OverallAttended,
    FieldAttended(String),
    FieldPercentage(String),
    FieldHeld(String),
}

impl Metric {
    /// Resolve against a record
    ///
    /// A field missing from the record yields `0` for counts and a blank for
    /// percentages.
    pub fn value(&self, result: &ExtractionResult) -> CellValue {
        match self {
            Metric::OverallPercentage => CellValue::Number(result.summary.percentage),
            Metric::OverallAttended => CellValue::from(result.summary.attended_count),
            Metric::FieldAttended(name) => {
                CellValue::from(result.field(name).map(|f| f.attended_count).unwrap_or(0))
            },
            Metric::FieldHeld(name) => {
                CellValue::from(result.field(name).map(|f| f.held_count).unwrap_or(0))
            },
            Metric::FieldPercentage(name) => result
                .field(name)
                .map(|f| CellValue::Number(f.percentage))
                .unwrap_or(CellValue::Empty),
        }
    }
}

/// Per-run versioned column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBinding {
    /// Leftmost column a snapshot may occupy
    pub first_column: u32,
    pub metric: Metric,
}

/// Column overwritten on every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBinding {
    pub column: u32,
    pub metric: Metric,
}

/// One destination table's layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,

    /// Row holding snapshot timestamps
    #[serde(default = "default_header_row")]
    pub header_row: u32,

    #[serde(default = "default_key_column")]
    pub key_column: u32,

    /// First row that may hold a key; rows above it belong to the header region
    #[serde(default = "default_first_key_row")]
    pub first_key_row: u32,

    #[serde(default)]
    pub snapshot: Option<SnapshotBinding>,

    #[serde(default)]
    pub fixed: Vec<FixedBinding>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header_row: default_header_row(),
            key_column: default_key_column(),
            first_key_row: default_first_key_row(),
            snapshot: None,
            fixed: Vec::new(),
        }
    }

    pub fn with_snapshot(mut self, first_column: u32, metric: Metric) -> Self {
        self.snapshot = Some(SnapshotBinding {
            first_column,
            metric,
        });
        self
    }

    pub fn with_fixed(mut self, column: u32, metric: Metric) -> Self {
        self.fixed.push(FixedBinding { column, metric });
        self
    }

    pub fn with_key_rows(mut self, header_row: u32, first_key_row: u32) -> Self {
        self.header_row = header_row;
        self.first_key_row = first_key_row;
        self
    }

    /// Rightmost column the layout addresses before any snapshot is added
    pub fn required_columns(&self) -> u32 {
        self.fixed
            .iter()
            .map(|b| b.column)
            .chain(std::iter::once(self.key_column))
            .max()
            .unwrap_or(self.key_column)
    }
}

/// What to write into an extra cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum ExtraValue {
    /// Every field's held count, one per row downward
    HeldCounts,
    /// The run's snapshot header text
    RunTimestamp,
    Metric(Metric),
}

/// Additional destination for one specific key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraCellBinding {
    pub key: EntityKey,
    pub table: String,
    pub row: u32,
    pub column: u32,
    pub value: ExtraValue,
}
