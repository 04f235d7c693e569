//! Tally Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Tally workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`TallyError`] and the [`Result`] alias used by configuration
//!   loading and file-backed stores
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], the single place
//!   where the `tracing` subscriber is assembled
//!
//! # Example
//!
//! ```no_run
//! use tally_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     info!("harvester starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TallyError};
