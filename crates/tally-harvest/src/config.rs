//! Harvest configuration
//!
//! Loaded from a TOML file, then overridden from `TALLY_*` environment
//! variables, then validated. Every section is optional except `[keys]` and at
//! least one `[[tables]]` entry.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tally_common::{Result, TallyError};

use crate::keys::KeySpec;
use crate::retry::RetryPolicy;
use crate::table::snapshot::{DEFAULT_HEADER_FORMAT, DEFAULT_UTC_OFFSET_MINUTES};
use crate::table::{ExtraCellBinding, SnapshotClock, TableSpec};
use crate::writer::DEFAULT_ERROR_MARKER;

/// Default concurrency limit (keys per batch)
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// Default pause between batches in milliseconds
pub const DEFAULT_BATCH_DELAY_MS: u64 = 1000;

/// Default extraction attempts per key
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout in seconds
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

/// Default pause between extraction attempts in milliseconds
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Default store write attempts
pub const DEFAULT_WRITE_MAX_ATTEMPTS: u32 = 3;

/// Default pause between store write attempts in milliseconds
pub const DEFAULT_WRITE_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub concurrency_limit: usize,
    pub batch_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub error_marker: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_WRITE_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_WRITE_BACKOFF_MS,
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
        }
    }
}

impl WriterConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub utc_offset_minutes: i32,
    pub header_format: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            header_format: DEFAULT_HEADER_FORMAT.to_string(),
        }
    }
}

impl SnapshotConfig {
    pub fn clock(&self) -> Result<SnapshotClock> {
        SnapshotClock::new(self.utc_offset_minutes, self.header_format.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Field holding the overall figures; the last field when unset
    pub total_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub keys: KeySpec,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub tables: Vec<TableSpec>,

    #[serde(default)]
    pub extra_cells: Vec<ExtraCellBinding>,
}

impl HarvestConfig {
    /// Read, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `TALLY_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "TALLY_CONCURRENCY")? {
            self.scheduler.concurrency_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "TALLY_BATCH_DELAY_MS")? {
            self.scheduler.batch_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "TALLY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "TALLY_ATTEMPT_TIMEOUT_SECS")? {
            self.retry.attempt_timeout_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.keys.validate()?;

        if self.scheduler.concurrency_limit == 0 {
            return Err(TallyError::config("concurrency_limit must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(TallyError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.attempt_timeout_secs == 0 {
            return Err(TallyError::config("retry.attempt_timeout_secs must be positive"));
        }
        if self.writer.max_attempts == 0 {
            return Err(TallyError::config("writer.max_attempts must be at least 1"));
        }
        if self.writer.error_marker.trim().is_empty() {
            return Err(TallyError::config("writer.error_marker must not be blank"));
        }
        self.snapshot.clock()?;

        if self.tables.is_empty() {
            return Err(TallyError::config("at least one [[tables]] entry is required"));
        }

        let mut names = HashSet::new();
        for table in &self.tables {
            validate_table(table)?;
            if !names.insert(table.name.as_str()) {
                return Err(TallyError::config(format!("duplicate table '{}'", table.name)));
            }
        }

        for extra in &self.extra_cells {
            if !names.contains(extra.table.as_str()) {
                return Err(TallyError::UnknownTable(extra.table.clone()));
            }
            if extra.row == 0 || extra.column == 0 {
                return Err(TallyError::config(format!(
                    "extra cell for {} uses a zero index",
                    extra.key
                )));
            }
        }

        Ok(())
    }
}

fn validate_table(table: &TableSpec) -> Result<()> {
    let name = &table.name;
    if name.trim().is_empty() {
        return Err(TallyError::config("table name must not be blank"));
    }
    if table.header_row == 0 || table.key_column == 0 {
        return Err(TallyError::config(format!("table '{}' uses a zero index", name)));
    }
    if table.first_key_row <= table.header_row {
        return Err(TallyError::config(format!(
            "table '{}': first_key_row ({}) must be below header_row ({})",
            name, table.first_key_row, table.header_row
        )));
    }
    if table.snapshot.is_none() && table.fixed.is_empty() {
        return Err(TallyError::config(format!("table '{}' binds no values", name)));
    }

    let mut columns = HashSet::new();
    columns.insert(table.key_column);
    for binding in &table.fixed {
        if !columns.insert(binding.column) {
            return Err(TallyError::config(format!(
                "table '{}': column {} is bound twice or overlaps the key column",
                name, binding.column
            )));
        }
    }

    if let Some(ref snapshot) = table.snapshot {
        let reserved = columns.iter().copied().max().unwrap_or(0);
        if snapshot.first_column <= reserved {
            return Err(TallyError::config(format!(
                "table '{}': snapshot columns must start right of column {}",
                name, reserved
            )));
        }
    }

    Ok(())
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TallyError::config(format!("{} is not a valid number: '{}'", name, raw))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::table::{ExtraValue, Metric};
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [keys]
        prefix = "237Z1A05"
        numeric = { start = 72, end = 99, width = 2 }
        letters = "ABCD"
        digits = "123456789"
        skip = ["80", "88"]

        [retry]
        max_attempts = 2

        [[tables]]
        name = "Overall"
        snapshot = { first_column = 2, metric = { kind = "overall_percentage" } }

        [[tables]]
        name = "DAA"
        header_row = 10
        first_key_row = 27
        snapshot = { first_column = 3, metric = { kind = "field_percentage", field = "DAA" } }

        [[extra_cells]]
        key = "237Z1A0575"
        table = "Overall"
        row = 24
        column = 3
        value = { kind = "run_timestamp" }
    "#;

    #[test]
    fn test_sample_parses_with_defaults() {
        let config = HarvestConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.scheduler.concurrency_limit, DEFAULT_CONCURRENCY_LIMIT);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.attempt_timeout(), Duration::from_secs(10));
        assert_eq!(config.writer.error_marker, "#FAILED");
        assert_eq!(config.snapshot.utc_offset_minutes, 330);
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.extra_cells[0].value, ExtraValue::RunTimestamp);
        assert_eq!(
            config.tables[1].snapshot.as_ref().unwrap().metric,
            Metric::FieldPercentage("DAA".into())
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HarvestConfig::from_toml(SAMPLE).unwrap();
        let vars: HashMap<&str, &str> = [("TALLY_CONCURRENCY", "15"), ("TALLY_BATCH_DELAY_MS", " 0 ")]
            .into_iter()
            .collect();

        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.scheduler.concurrency_limit, 15);
        assert_eq!(config.scheduler.batch_delay_ms, 0);
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = HarvestConfig::from_toml(SAMPLE).unwrap();
        let err = config
            .apply_overrides(|name| (name == "TALLY_MAX_ATTEMPTS").then(|| "three".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TALLY_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validation_failures() {
        let base = HarvestConfig::from_toml(SAMPLE).unwrap();

        let mut config = base.clone();
        config.scheduler.concurrency_limit = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.tables.push(config.tables[0].clone());
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.extra_cells[0].table = "Missing".to_string();
        assert!(matches!(config.validate(), Err(TallyError::UnknownTable(_))));

        let mut config = base.clone();
        config.tables[0] = TableSpec::new("Overall").with_fixed(1, Metric::OverallAttended);
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.tables[0] = TableSpec::new("Overall")
            .with_fixed(2, Metric::OverallAttended)
            .with_snapshot(2, Metric::OverallPercentage);
        assert!(config.validate().is_err());

        let mut config = base;
        config.snapshot.utc_offset_minutes = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = HarvestConfig::load(&path).unwrap();
        assert_eq!(config.tables[0].name, "Overall");
    }
}
