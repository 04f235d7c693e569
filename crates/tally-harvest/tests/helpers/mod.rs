//! Test helpers for harvest integration tests
//!
//! - Scripted extractor with per-key attempt scripts
//! - Recording store that logs every mutation and can inject write failures
//! - A shared event log ordering extractions against store writes

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_harvest::store::{CellRef, CellValue, Dimensions, Rect, Store, StoreError};
use tally_harvest::types::{EntityKey, ExtractionResult, Failure, FieldRecord};
use tally_harvest::{HarvestConfig, MemoryStore};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tally_harvest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Something that happened during a run, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AttemptStarted { key: String, attempt: u32 },
    AttemptFinished { key: String, attempt: u32 },
    GrowRows { table: String, n: u32 },
    GrowCols { table: String, n: u32 },
    WriteCell { table: String, cell: CellRef },
    WriteRange { table: String, origin: CellRef },
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Record whose `Total` line is at `percentage`
pub fn record(percentage: f64) -> ExtractionResult {
    ExtractionResult::from_fields(
        vec![
            FieldRecord {
                name: "DAA".to_string(),
                held_count: 40,
                attended_count: 30,
                percentage: 75.0,
            },
            FieldRecord {
                name: "Total".to_string(),
                held_count: 200,
                attended_count: (percentage * 2.0) as u32,
                percentage,
            },
        ],
        None,
    )
    .unwrap()
}

/// What one extraction attempt does
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(f64),
    Fail(Failure),
    /// Sleep well past any attempt timeout
    Hang,
}

/// Extractor following a per-key script; the last step repeats
pub struct ScriptedExtractor {
    scripts: HashMap<String, Vec<Step>>,
    attempts: Mutex<HashMap<String, u32>>,
    log: EventLog,
    latency: Duration,
}

impl ScriptedExtractor {
    pub fn new(log: EventLog) -> Self {
        Self {
            scripts: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            log,
            latency: Duration::from_millis(100),
        }
    }

    pub fn script(mut self, key: &str, steps: Vec<Step>) -> Self {
        self.scripts.insert(key.to_string(), steps);
        self
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl tally_harvest::Extractor for ScriptedExtractor {
    async fn fetch(&self, key: &EntityKey, timeout: Duration) -> Result<ExtractionResult, Failure> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(key.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        self.log.lock().unwrap().push(Event::AttemptStarted {
            key: key.to_string(),
            attempt,
        });

        let step = self
            .scripts
            .get(key.as_str())
            .and_then(|steps| steps.get(attempt as usize - 1).or(steps.last()))
            .cloned()
            .unwrap_or(Step::Fail(Failure::remote("no script")));

        let result = match step {
            Step::Succeed(pct) => {
                tokio::time::sleep(self.latency).await;
                Ok(record(pct))
            },
            Step::Fail(failure) => {
                tokio::time::sleep(self.latency).await;
                Err(failure)
            },
            Step::Hang => {
                tokio::time::sleep(timeout * 100).await;
                Err(Failure::remote("woke up"))
            },
        };

        self.log.lock().unwrap().push(Event::AttemptFinished {
            key: key.to_string(),
            attempt,
        });
        result
    }
}

/// MemoryStore wrapper that logs mutations and can fail writes
pub struct RecordingStore {
    pub inner: MemoryStore,
    log: EventLog,
    failing: Mutex<Option<(CellRef, u32)>>,
    failure: StoreError,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore, log: EventLog) -> Self {
        Self {
            inner,
            log,
            failing: Mutex::new(None),
            failure: StoreError::Unavailable("503 Service Unavailable".to_string()),
        }
    }

    /// Fail the next `n` writes to `cell` with `failure`
    pub fn fail_writes(self, cell: CellRef, n: u32, failure: StoreError) -> Self {
        *self.failing.lock().unwrap() = Some((cell, n));
        Self { failure, ..self }
    }

    pub async fn cell(&self, table: &str, row: u32, col: u32) -> CellValue {
        self.inner
            .cell(table, CellRef::new(row, col))
            .await
            .unwrap_or(CellValue::Empty)
    }

    fn push(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }

    fn take_failure(&self, cell: CellRef) -> Option<StoreError> {
        let mut failing = self.failing.lock().unwrap();
        match failing.as_mut() {
            Some((target, remaining)) if *target == cell && *remaining > 0 => {
                *remaining -= 1;
                Some(self.failure.clone())
            },
            _ => None,
        }
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn dimensions(&self, table: &str) -> Result<Dimensions, StoreError> {
        self.inner.dimensions(table).await
    }

    async fn read_column(&self, table: &str, col: u32) -> Result<Vec<CellValue>, StoreError> {
        self.inner.read_column(table, col).await
    }

    async fn read_range(&self, table: &str, rect: Rect) -> Result<Vec<Vec<CellValue>>, StoreError> {
        self.inner.read_range(table, rect).await
    }

    async fn write_cell(&self, table: &str, cell: CellRef, value: CellValue) -> Result<(), StoreError> {
        if let Some(err) = self.take_failure(cell) {
            return Err(err);
        }
        self.push(Event::WriteCell {
            table: table.to_string(),
            cell,
        });
        self.inner.write_cell(table, cell, value).await
    }

    async fn write_range(
        &self,
        table: &str,
        origin: CellRef,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), StoreError> {
        self.push(Event::WriteRange {
            table: table.to_string(),
            origin,
        });
        self.inner.write_range(table, origin, values).await
    }

    async fn grow_rows(&self, table: &str, n: u32) -> Result<(), StoreError> {
        self.push(Event::GrowRows {
            table: table.to_string(),
            n,
        });
        self.inner.grow_rows(table, n).await
    }

    async fn grow_cols(&self, table: &str, n: u32) -> Result<(), StoreError> {
        self.push(Event::GrowCols {
            table: table.to_string(),
            n,
        });
        self.inner.grow_cols(table, n).await
    }
}

/// Single summary table config with fast timings
pub fn summary_config(keys: &[&str], concurrency: usize, max_attempts: u32) -> HarvestConfig {
    let extra = keys
        .iter()
        .map(|k| format!("\"{}\"", k))
        .collect::<Vec<_>>()
        .join(", ");

    let config = HarvestConfig::from_toml(&format!(
        r#"
        [keys]
        extra = [{extra}]

        [scheduler]
        concurrency_limit = {concurrency}
        batch_delay_ms = 1000

        [retry]
        max_attempts = {max_attempts}
        attempt_timeout_secs = 10
        backoff_ms = 500

        [writer]
        max_attempts = 3
        backoff_ms = 250

        [[tables]]
        name = "Overall"
        snapshot = {{ first_column = 2, metric = {{ kind = "overall_percentage" }} }}
        "#
    ))
    .unwrap();
    config.validate().unwrap();
    config
}

/// Overall table with a header label and existing key rows
pub fn seeded_store(keys: &[&str], spare_rows: u32) -> MemoryStore {
    let rows = 1 + keys.len() as u32 + spare_rows;
    MemoryStore::new().with_table("Overall", rows, 1)
}

pub async fn seed_keys(store: &MemoryStore, keys: &[&str]) {
    store
        .write_cell("Overall", CellRef::new(1, 1), CellValue::text("Roll No"))
        .await
        .unwrap();
    for (i, key) in keys.iter().enumerate() {
        store
            .write_cell("Overall", CellRef::new(i as u32 + 2, 1), CellValue::text(*key))
            .await
            .unwrap();
    }
}

/// Keys in a table's key column, top to bottom, skipping the header
pub async fn key_column(store: &MemoryStore, table: &str) -> Vec<String> {
    store
        .read_column(table, 1)
        .await
        .unwrap()
        .into_iter()
        .skip(1)
        .filter_map(|c| c.as_key_text())
        .collect()
}

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

pub fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(pred).expect("event not found")
}
