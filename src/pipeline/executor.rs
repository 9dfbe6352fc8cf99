//! Parallel fan-out/fan-in over a batch of records
//!
//! Two disciplines:
//! - CPU-bound work runs on a rayon pool built for the call and sized to
//!   `cpu_workers`, so concurrent decode buffers stay bounded.
//! - I/O-bound work runs as blocking tokio tasks, up to `io_workers` in flight.
//!
//! Either way the call waits for every item, and results come back in batch
//! order. A panicking worker is a defect and fails the whole call.

use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

use super::contract::ExecutionMode;
use crate::error::PipelineError;
use crate::state::record::{ImageRecord, RecordId};

/// Default number of concurrent blocking I/O workers
pub const DEFAULT_IO_WORKERS: usize = 32;

/// Explicit pool sizing for both execution modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub cpu_workers: usize,
    pub io_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cpu_workers: available_cores(),
            io_workers: DEFAULT_IO_WORKERS,
        }
    }
}

/// Number of processing units the process may use
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `work` over every item and collect the results in item order
    pub async fn execute<T, F>(
        &self,
        mode: ExecutionMode,
        items: Vec<ImageRecord>,
        work: F,
    ) -> Result<Vec<T>, PipelineError>
    where
        T: Send + 'static,
        F: Fn(&ImageRecord) -> T + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        match mode {
            ExecutionMode::Cpu => self.execute_cpu(items, work).await,
            ExecutionMode::Io => self.execute_io(items, work).await,
        }
    }

    async fn execute_cpu<T, F>(&self, items: Vec<ImageRecord>, work: F) -> Result<Vec<T>, PipelineError>
    where
        T: Send + 'static,
        F: Fn(&ImageRecord) -> T + Send + Sync + 'static,
    {
        let workers = self.config.cpu_workers.max(1);
        debug!(items = items.len(), workers, "Dispatching CPU-bound batch");

        // The rayon pool blocks the calling thread until every item is done
        tokio::task::spawn_blocking(move || -> Result<Vec<T>, PipelineError> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("batch-cpu-{i}"))
                .build()?;

            let results: Vec<Result<T, String>> = pool.install(|| {
                items
                    .par_iter()
                    .map(|item| {
                        panic::catch_unwind(AssertUnwindSafe(|| work(item))).map_err(panic_message)
                    })
                    .collect()
            });

            collect_ordered(items.iter().map(|item| item.id), results)
        })
        .await?
    }

    async fn execute_io<T, F>(&self, items: Vec<ImageRecord>, work: F) -> Result<Vec<T>, PipelineError>
    where
        T: Send + 'static,
        F: Fn(&ImageRecord) -> T + Send + Sync + 'static,
    {
        let workers = self.config.io_workers.max(1);
        debug!(items = items.len(), workers, "Dispatching I/O-bound batch");

        let ids: Vec<RecordId> = items.iter().map(|item| item.id).collect();
        let work = Arc::new(work);

        // `buffered` keeps at most `workers` tasks in flight and yields in input order
        let joined: Vec<_> = stream::iter(items)
            .map(|item| {
                let work = Arc::clone(&work);
                tokio::task::spawn_blocking(move || work(&item))
            })
            .buffered(workers)
            .collect()
            .await;

        let mut results = Vec::with_capacity(joined.len());
        for joined in joined {
            match joined {
                Ok(value) => results.push(Ok(value)),
                Err(e) if e.is_panic() => results.push(Err(panic_message(e.into_panic()))),
                Err(e) => return Err(PipelineError::Dispatcher(e)),
            }
        }

        collect_ordered(ids.into_iter(), results)
    }
}

/// Zip results back onto their items, surfacing the first worker panic
fn collect_ordered<T>(
    ids: impl Iterator<Item = RecordId>,
    results: Vec<Result<T, String>>,
) -> Result<Vec<T>, PipelineError> {
    ids.zip(results)
        .enumerate()
        .map(|(index, (record, result))| {
            result.map_err(|message| PipelineError::WorkerPanicked {
                index,
                record,
                message,
            })
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::record::SessionId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn batch(n: usize) -> Vec<ImageRecord> {
        (0..n)
            .map(|i| ImageRecord::pending_import(SessionId::from("s"), format!("/in/{i}.png")))
            .collect()
    }

    fn small_config() -> ExecutorConfig {
        ExecutorConfig {
            cpu_workers: 3,
            io_workers: 4,
        }
    }

    #[tokio::test]
    async fn test_cpu_mode_preserves_order() {
        let items = batch(8);
        let expected: Vec<RecordId> = items.iter().map(|r| r.id).collect();
        let executor = Executor::new(small_config());

        // Earlier items sleep longer, so they finish last
        let results = executor
            .execute(ExecutionMode::Cpu, items, |record| {
                let index: u64 = record.display_name().parse().unwrap();
                std::thread::sleep(Duration::from_millis(40 - index * 5));
                record.id
            })
            .await
            .unwrap();

        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn test_io_mode_preserves_order() {
        let items = batch(10);
        let expected: Vec<RecordId> = items.iter().map(|r| r.id).collect();
        let executor = Executor::new(small_config());

        let results = executor
            .execute(ExecutionMode::Io, items, |record| {
                let index: u64 = record.display_name().parse().unwrap();
                std::thread::sleep(Duration::from_millis(50 - index * 5));
                record.id
            })
            .await
            .unwrap();

        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn test_cpu_mode_respects_worker_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = Executor::new(ExecutorConfig {
            cpu_workers: 2,
            io_workers: 8,
        });

        let (current, max_seen) = (Arc::clone(&in_flight), Arc::clone(&peak));
        executor
            .execute(ExecutionMode::Cpu, batch(12), move |_| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_batch() {
        let items = batch(4);
        let bad = items[2].id;
        let executor = Executor::new(small_config());

        for mode in [ExecutionMode::Cpu, ExecutionMode::Io] {
            let err = executor
                .execute(mode, items.clone(), move |record| {
                    if record.id == bad {
                        panic!("defect in worker");
                    }
                    record.id
                })
                .await
                .unwrap_err();

            match err {
                PipelineError::WorkerPanicked { index, record, message } => {
                    assert_eq!(index, 2);
                    assert_eq!(record, bad);
                    assert!(message.contains("defect in worker"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = Executor::default();
        let results: Vec<()> = executor
            .execute(ExecutionMode::Cpu, Vec::new(), |_| ())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
