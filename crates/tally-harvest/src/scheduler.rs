//! Batch scheduling
//!
//! Keys are cut into consecutive batches of `concurrency_limit`. A batch runs
//! all of its tasks concurrently and is only yielded once every task is
//! terminal; the next batch starts when the consumer polls again, after the
//! inter-batch delay. That gives the store writes for batch N a window before
//! batch N+1 hits the remote source.

use futures::future::join_all;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::retry::RetryingTaskRunner;
use crate::types::{EntityKey, Failure, FailureKind, Task, TaskOutcome};

/// Outcomes of one batch, in the batch's key order
#[derive(Debug)]
pub struct Batch {
    /// 1-based batch number
    pub index: usize,
    pub outcomes: Vec<TaskOutcome>,
}

#[derive(Clone)]
pub struct BatchScheduler {
    runner: Arc<RetryingTaskRunner>,
    concurrency_limit: usize,
    batch_delay: Duration,
}

impl BatchScheduler {
    pub fn new(runner: Arc<RetryingTaskRunner>, concurrency_limit: usize, batch_delay: Duration) -> Self {
        Self {
            runner,
            concurrency_limit: concurrency_limit.max(1),
            batch_delay,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Number of batches `key_count` keys split into
    pub fn batch_count(&self, key_count: usize) -> usize {
        key_count.div_ceil(self.concurrency_limit)
    }

    /// Lazily run `keys` batch by batch
    pub fn batches(&self, keys: Vec<EntityKey>) -> impl Stream<Item = Batch> + Send + 'static {
        let chunks: VecDeque<Vec<EntityKey>> = keys
            .chunks(self.concurrency_limit)
            .map(|chunk| chunk.to_vec())
            .collect();
        let scheduler = self.clone();

        stream::unfold((scheduler, chunks, 0usize), |(scheduler, mut chunks, done)| async move {
            let keys = chunks.pop_front()?;
            if done > 0 && !scheduler.batch_delay.is_zero() {
                tokio::time::sleep(scheduler.batch_delay).await;
            }
            let batch = scheduler.run_batch(done + 1, keys).await;
            Some((batch, (scheduler, chunks, done + 1)))
        })
    }

    #[instrument(skip(self, keys), fields(batch = index, size = keys.len()))]
    async fn run_batch(&self, index: usize, keys: Vec<EntityKey>) -> Batch {
        info!("Starting batch");

        let handles: Vec<_> = keys
            .iter()
            .cloned()
            .map(|key| {
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move { runner.run(key).await })
            })
            .collect();

        let outcomes: Vec<TaskOutcome> = keys
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(key, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(key = %key, error = %e, "Task worker died");
                    aborted(key, e.to_string())
                },
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(succeeded, failed = outcomes.len() - succeeded, "Batch complete");

        Batch { index, outcomes }
    }
}

fn aborted(key: EntityKey, message: String) -> TaskOutcome {
    let mut task = Task::new(key);
    // Fresh task: Pending -> Running -> Failed is always legal.
    let _ = task.start().and_then(|_| task.fail());
    TaskOutcome {
        task,
        result: Err(Failure::new(FailureKind::Aborted, message)),
    }
}
