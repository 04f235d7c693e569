//! Replay captured records from disk
//!
//! Each key's record lives at `<dir>/<key>.json` as `{"fields": [...]}`. The
//! summary is derived from the configured total field, exactly as for a live
//! extraction.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::Extractor;
use crate::types::{EntityKey, ExtractionResult, Failure, FieldRecord};

#[derive(Debug, Deserialize)]
struct RecordFile {
    fields: Vec<FieldRecord>,
}

#[derive(Debug, Clone)]
pub struct ReplayExtractor {
    dir: PathBuf,
    total_field: Option<String>,
}

impl ReplayExtractor {
    pub fn new(dir: impl Into<PathBuf>, total_field: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            total_field,
        }
    }

    fn record_path(&self, key: &EntityKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl Extractor for ReplayExtractor {
    async fn fetch(&self, key: &EntityKey, timeout: Duration) -> Result<ExtractionResult, Failure> {
        let path = self.record_path(key);

        let bytes = match tokio::time::timeout(timeout, tokio::fs::read(&path)).await {
            Err(_) => return Err(Failure::timeout(format!("reading {}", path.display()))),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Failure::remote(format!("no captured record for {}", key)))
            },
            Ok(Err(e)) => return Err(Failure::remote(format!("{}: {}", path.display(), e))),
            Ok(Ok(bytes)) => bytes,
        };

        let record: RecordFile = serde_json::from_slice(&bytes)
            .map_err(|e| Failure::parse(format!("{}: {}", path.display(), e)))?;

        debug!(key = %key, fields = record.fields.len(), "Replayed record");
        ExtractionResult::from_fields(record.fields, self.total_field.as_deref())
    }
}
