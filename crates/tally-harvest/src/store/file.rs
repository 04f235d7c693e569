//! JSON file backed store
//!
//! Loads every table into a [`MemoryStore`] at open time and writes the whole
//! image back on [`JsonFileStore::save`]. Saving goes through a temporary file
//! in the same directory followed by a rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tally_common::Result;
use tracing::{debug, info};

use super::memory::{MemoryStore, StoreSnapshot};
use super::{CellRef, CellValue, Dimensions, Rect, Store, StoreError};

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open a store file; a missing file starts an empty store
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
            info!(
                path = %path.display(),
                tables = snapshot.tables.len(),
                "Loaded store file"
            );
            MemoryStore::from_snapshot(snapshot)
        } else {
            info!(path = %path.display(), "Store file not found, starting empty");
            MemoryStore::new()
        };

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Add an empty table for every name the file does not have yet
    ///
    /// Key columns of new tables fill in on the first run, as unseen keys are
    /// appended. Returns the names that were created.
    pub async fn ensure_tables<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut created = Vec::new();
        for name in names {
            if let Err(StoreError::TableNotFound(_)) = self.inner.dimensions(name).await {
                info!(table = name, "Creating empty table");
                self.inner.add_table(name, 0, 0).await;
                created.push(name.to_string());
            }
        }
        created
    }

    pub async fn save(&self) -> Result<()> {
        let snapshot = self.inner.snapshot().await;
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = json.len(), "Saved store file");
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn dimensions(&self, table: &str) -> std::result::Result<Dimensions, StoreError> {
        self.inner.dimensions(table).await
    }

    async fn read_column(&self, table: &str, col: u32) -> std::result::Result<Vec<CellValue>, StoreError> {
        self.inner.read_column(table, col).await
    }

    async fn read_range(
        &self,
        table: &str,
        rect: Rect,
    ) -> std::result::Result<Vec<Vec<CellValue>>, StoreError> {
        self.inner.read_range(table, rect).await
    }

    async fn write_cell(
        &self,
        table: &str,
        cell: CellRef,
        value: CellValue,
    ) -> std::result::Result<(), StoreError> {
        self.inner.write_cell(table, cell, value).await
    }

    async fn write_range(
        &self,
        table: &str,
        origin: CellRef,
        values: Vec<Vec<CellValue>>,
    ) -> std::result::Result<(), StoreError> {
        self.inner.write_range(table, origin, values).await
    }

    async fn grow_rows(&self, table: &str, n: u32) -> std::result::Result<(), StoreError> {
        self.inner.grow_rows(table, n).await
    }

    async fn grow_cols(&self, table: &str, n: u32) -> std::result::Result<(), StoreError> {
        self.inner.grow_cols(table, n).await
    }
}
