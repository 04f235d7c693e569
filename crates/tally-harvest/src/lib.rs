//! Tally Harvest Library
//!
//! Batch harvesting of per-entity records from a session-gated source into a
//! shared, column-versioned tabular store.
//!
//! # Pipeline
//!
//! - **keys**: deterministic entity key enumeration
//! - **retry** / **scheduler**: bounded retries per key, bounded-concurrency batches
//! - **table**: row mapping and per-run snapshot column allocation
//! - **writer**: commits values or the error marker into destination tables
//! - **coordinator**: wires a whole run together and reports a [`RunSummary`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_harvest::{keys, HarvestConfig, ReplayExtractor, RunCoordinator};
//! use tally_harvest::store::file::JsonFileStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HarvestConfig::load("harvest.toml")?;
//!     let store = Arc::new(JsonFileStore::open("store.json").await?);
//!     let extractor = Arc::new(ReplayExtractor::new("records", None));
//!
//!     let coordinator = RunCoordinator::new(&config, store.clone(), extractor)?;
//!     let summary = coordinator.run(keys::generate(&config.keys)).await?;
//!     store.save().await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod extract;
pub mod keys;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod summary;
pub mod table;
pub mod types;
pub mod writer;

pub use config::HarvestConfig;
pub use coordinator::{RunCoordinator, RunError};
pub use extract::{Extractor, ReplayExtractor};
pub use store::{MemoryStore, Store, StoreError};
pub use summary::RunSummary;
pub use types::{EntityKey, ExtractionResult, Failure, FailureKind, FieldRecord};
