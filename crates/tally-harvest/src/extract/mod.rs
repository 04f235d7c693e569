//! Extraction contract
//!
//! An [`Extractor`] turns one key into a record or a typed [`Failure`]. It owns
//! whatever remote session it needs for the duration of a single call and
//! never retries on its own; retries belong to [`crate::retry`].

pub mod replay;
pub mod session;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{EntityKey, ExtractionResult, Failure};

pub use replay::ReplayExtractor;
pub use session::{Session, SessionExtractor, SessionFactory};

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch one key's record within `timeout`
    async fn fetch(&self, key: &EntityKey, timeout: Duration) -> Result<ExtractionResult, Failure>;
}
