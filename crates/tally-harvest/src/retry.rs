//! Bounded retries around a single key's extraction
//!
//! Attempts for one key run one after another with a fixed pause between them.
//! Whatever happens inside an attempt (failure, timeout, panic) ends up as a
//! [`Failure`] in the returned [`TaskOutcome`]; the runner itself never errors.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::extract::Extractor;
use crate::store::StoreError;
use crate::types::{EntityKey, Failure, FailureKind, Task, TaskOutcome, TransitionError};

/// Extra time an attempt gets past its own timeout to release its session
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Fixed-backoff retry policy
///
/// `max_attempts` counts every attempt, the first one included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Pause to take after failed attempt `attempt` (1-indexed)
    ///
    /// `None` once the attempt budget is spent.
    pub fn backoff_after(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.backoff)
        } else {
            None
        }
    }
}

/// Run a store call under `policy`, retrying only transient errors
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, table: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => match policy.backoff_after(attempt) {
                Some(backoff) => {
                    warn!(table, attempt, error = %e, "Store call failed, retrying");
                    tokio::time::sleep(backoff).await;
                },
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

pub struct RetryingTaskRunner {
    extractor: Arc<dyn Extractor>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    close_grace: Duration,
}

impl RetryingTaskRunner {
    pub fn new(extractor: Arc<dyn Extractor>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            extractor,
            policy,
            attempt_timeout,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Drive one key to a terminal state
    #[instrument(skip(self), fields(key = %key))]
    pub async fn run(&self, key: EntityKey) -> TaskOutcome {
        let mut task = Task::new(key);

        loop {
            step(&mut task, Task::start);
            let attempt = task.attempts();

            match self.attempt(task.key()).await {
                Ok(result) => {
                    step(&mut task, Task::succeed);
                    debug!(attempt, "Extraction succeeded");
                    return TaskOutcome {
                        task,
                        result: Ok(result),
                    };
                },
                Err(failure) => match self.policy.backoff_after(attempt) {
                    Some(backoff) => {
                        warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            kind = %failure.kind,
                            error = %failure.message,
                            "Extraction attempt failed, retrying in {}ms",
                            backoff.as_millis()
                        );
                        step(&mut task, Task::retry);
                        tokio::time::sleep(backoff).await;
                    },
                    None => {
                        warn!(
                            attempts = attempt,
                            kind = %failure.kind,
                            error = %failure.message,
                            "Extraction failed, attempts exhausted"
                        );
                        step(&mut task, Task::fail);
                        return TaskOutcome {
                            task,
                            result: Err(failure),
                        };
                    },
                },
            }
        }
    }

    async fn attempt(&self, key: &EntityKey) -> Result<crate::types::ExtractionResult, Failure> {
        let fetch = AssertUnwindSafe(self.extractor.fetch(key, self.attempt_timeout)).catch_unwind();

        match tokio::time::timeout(self.attempt_timeout + self.close_grace, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Failure::new(FailureKind::Aborted, "extraction attempt panicked")),
            Err(_) => Err(Failure::timeout(format!(
                "attempt exceeded {}ms",
                self.attempt_timeout.as_millis()
            ))),
        }
    }
}

// Runner-driven transitions are always legal; log rather than abort if one isn't.
fn step(task: &mut Task, transition: fn(&mut Task) -> Result<(), TransitionError>) {
    if let Err(e) = transition(task) {
        error!(error = %e, "Task state machine violated");
    }
}
