//! Per-run report

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::table::Snapshot;
use crate::types::{EntityKey, TaskOutcome};
use crate::writer::WriteFailure;

/// A key whose extraction failed, with the final failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedKey {
    pub key: EntityKey,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub keys_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
    pub snapshots: Vec<Snapshot>,
    pub failed_keys: Vec<FailedKey>,
    pub write_failures: Vec<WriteFailure>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, keys_total: usize) -> Self {
        Self {
            run_id,
            started_at,
            completed_at: None,
            duration_secs: 0.0,
            keys_total,
            succeeded: 0,
            failed: 0,
            batches: 0,
            snapshots: Vec::new(),
            failed_keys: Vec::new(),
            write_failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &TaskOutcome) {
        match &outcome.result {
            Ok(_) => self.succeeded += 1,
            Err(failure) => {
                self.failed += 1;
                self.failed_keys.push(FailedKey {
                    key: outcome.key().clone(),
                    attempts: outcome.task.attempts(),
                    reason: failure.to_string(),
                });
            },
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        self.duration_secs = (at - self.started_at).num_milliseconds() as f64 / 1000.0;
    }

    /// Percentage of processed keys that succeeded
    pub fn success_rate(&self) -> f64 {
        let processed = self.succeeded + self.failed;
        if processed == 0 {
            0.0
        } else {
            (self.succeeded as f64 / processed as f64) * 100.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {}/{} keys succeeded ({:.1}%), {} failed, {} write failures, {} batches in {:.1}s",
            self.run_id,
            self.succeeded,
            self.keys_total,
            self.success_rate(),
            self.failed,
            self.write_failures.len(),
            self.batches,
            self.duration_secs
        )
    }
}
