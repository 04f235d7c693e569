//! Core types shared by the harvesting engine

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable identifier for one tracked entity (e.g. a roll number)
///
/// Used verbatim as the join key between extraction and the store's key column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One row of a per-entity record (a subject, a category, the total line...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub name: String,
    pub held_count: u32,
    pub attended_count: u32,
    pub percentage: f64,
}

/// Overall figures taken from the designated total field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub attended_count: u32,
    pub percentage: f64,
}

/// A successfully extracted record for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub fields: Vec<FieldRecord>,
    pub summary: Summary,
}

impl ExtractionResult {
    /// Build a result, deriving the summary from the total field
    ///
    /// `total_field` names the designated field; when `None` the last field is the
    /// total, matching record tables that end with a "Total" line.
    pub fn from_fields(fields: Vec<FieldRecord>, total_field: Option<&str>) -> Result<Self, Failure> {
        let total = match total_field {
            Some(name) => fields.iter().find(|f| f.name == name),
            None => fields.last(),
        }
        .ok_or_else(|| match total_field {
            Some(name) => Failure::parse(format!("total field '{}' missing from record", name)),
            None => Failure::parse("record has no fields"),
        })?;

        let summary = Summary {
            attended_count: total.attended_count,
            percentage: total.percentage,
        };

        Ok(Self { fields, summary })
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldRecord> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Why an extraction attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote source rejected the credentials
    Auth,
    /// The attempt exceeded its time budget
    Timeout,
    /// The remote page or payload did not have the expected shape
    Parse,
    /// The remote source refused or dropped the session
    Remote,
    /// The attempt's worker panicked
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::Timeout => "timeout",
            FailureKind::Parse => "parse",
            FailureKind::Remote => "remote",
            FailureKind::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed extraction failure; carried as data, never raised past the task runner
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Auth, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Parse, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Remote, message)
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid task transition for {key}: {from} -> {to}")]
pub struct TransitionError {
    pub key: EntityKey,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Per-key unit of work for one run
///
/// `Pending -> Running -> {Succeeded, Retrying -> Running, Failed}`; terminal
/// states are write-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    key: EntityKey,
    attempts: u32,
    status: TaskStatus,
}

impl Task {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            attempts: 0,
            status: TaskStatus::Pending,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Begin an attempt; counts it
    pub fn start(&mut self) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Retrying => {
                self.attempts += 1;
                self.transition(TaskStatus::Running)
            },
            _ => Err(self.invalid(TaskStatus::Running)),
        }
    }

    pub fn retry(&mut self) -> Result<(), TransitionError> {
        self.from_running(TaskStatus::Retrying)
    }

    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        self.from_running(TaskStatus::Succeeded)
    }

    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.from_running(TaskStatus::Failed)
    }

    fn from_running(&mut self, to: TaskStatus) -> Result<(), TransitionError> {
        if self.status == TaskStatus::Running {
            self.transition(to)
        } else {
            Err(self.invalid(to))
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), TransitionError> {
        self.status = to;
        Ok(())
    }

    fn invalid(&self, to: TaskStatus) -> TransitionError {
        TransitionError {
            key: self.key.clone(),
            from: self.status,
            to,
        }
    }
}

/// A task that reached a terminal state, with its data or failure
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub result: Result<ExtractionResult, Failure>,
}

impl TaskOutcome {
    pub fn key(&self) -> &EntityKey {
        self.task.key()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
