//! Caller-facing entry point: run one transform over one batch

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::contract::{run_unit, Transform, TransformOutcome};
use super::executor::{Executor, ExecutorConfig};
use crate::error::PipelineError;
use crate::session::Session;
use crate::state::partition::OutcomePartition;
use crate::state::record::ImageRecord;

/// Applies transforms to batches inside one session.
///
/// Holds no state between calls: callers thread `succeeded_new` of one run
/// into the next themselves.
#[derive(Debug, Clone)]
pub struct Pipeline {
    session: Session,
    executor: Executor,
}

impl Pipeline {
    pub fn new(session: Session, config: ExecutorConfig) -> Self {
        Self {
            session,
            executor: Executor::new(config),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Apply `transform` to every record of `batch`.
    ///
    /// Input records are never modified. Per-item failures land in
    /// `failed`; only a worker defect returns `Err`.
    pub async fn run<T>(&self, batch: &[ImageRecord], mut transform: T) -> Result<OutcomePartition, PipelineError>
    where
        T: Transform + 'static,
    {
        transform.prepare(batch);
        self.run_shared(batch, Arc::new(transform)).await
    }

    /// Same as `run`, for transforms chosen at runtime.
    /// `transform` is used as given; `prepare` is not called.
    pub async fn run_shared(
        &self,
        batch: &[ImageRecord],
        transform: Arc<dyn Transform>,
    ) -> Result<OutcomePartition, PipelineError> {
        let started = Instant::now();
        let name = transform.name();
        let mode = transform.mode();
        info!(
            transform = name,
            mode = ?mode,
            items = batch.len(),
            session = %self.session.id(),
            "Starting batch"
        );

        let outcomes = self.execute_raw(batch, transform).await?;
        let partition = OutcomePartition::from_outcomes(outcomes);

        info!(
            transform = name,
            new = partition.succeeded_new.len(),
            old = partition.superseded_old.len(),
            failed = partition.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(partition)
    }

    /// Raw per-item outcomes in batch order, before partitioning
    pub async fn execute_raw(
        &self,
        batch: &[ImageRecord],
        transform: Arc<dyn Transform>,
    ) -> Result<Vec<TransformOutcome>, PipelineError> {
        let session = self.session.clone();
        let mode = transform.mode();
        self.executor
            .execute(mode, batch.to_vec(), move |record| {
                run_unit(transform.as_ref(), &session, record)
            })
            .await
    }

    /// Bring external files into the session with an adopting transform.
    ///
    /// Each source becomes a record first, so a missing or unreadable file is
    /// reported through `failed` like any other item.
    pub async fn import<T>(&self, sources: &[PathBuf], transform: T) -> Result<OutcomePartition, PipelineError>
    where
        T: Transform + 'static,
    {
        let pending: Vec<ImageRecord> = sources
            .iter()
            .map(|source| ImageRecord::pending_import(self.session.id().clone(), source))
            .collect();
        self.run(&pending, transform).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::pipeline::contract::{Derivation, ExecutionMode, Outputs};
    use crate::session::SessionManager;
    use std::fs;
    use tempfile::TempDir;

    /// Copies the file, failing for anything named "bad"
    struct Touch;

    impl Transform for Touch {
        fn name(&self) -> &'static str {
            "touch"
        }

        fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
            if record.display_name() == "bad" {
                return Err(TransformError::unsupported("name", "bad"));
            }
            let path = outputs.allocate_like_input();
            fs::write(&path, b"data").map_err(|e| TransformError::resource(&path, "write", e))
        }
    }

    struct Validate;

    impl Transform for Validate {
        fn name(&self) -> &'static str {
            "validate"
        }

        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Io
        }

        fn derivation(&self) -> Derivation {
            Derivation::Passthrough
        }

        fn apply(&self, _record: &ImageRecord, _outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
            Ok(())
        }
    }

    fn pipeline() -> (TempDir, Pipeline) {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let config = ExecutorConfig {
            cpu_workers: 2,
            io_workers: 4,
        };
        (data, Pipeline::new(session, config))
    }

    fn records(pipeline: &Pipeline, names: &[&str]) -> Vec<ImageRecord> {
        names
            .iter()
            .map(|name| {
                ImageRecord::pending_import(pipeline.session().id().clone(), format!("/in/{name}.png"))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_run_partitions_and_counts_match() {
        let (_data, pipeline) = pipeline();
        let batch = records(&pipeline, &["a", "bad", "c"]);

        let partition = pipeline.run(&batch, Touch).await.unwrap();

        assert_eq!(partition.succeeded_new.len() + partition.failed.len(), batch.len());
        assert_eq!(partition.succeeded_new.len(), partition.superseded_old.len());
        assert_eq!(partition.failed[0].id, batch[1].id);
        for (new, old) in partition.succeeded_new.iter().zip(&partition.superseded_old) {
            assert_eq!(new.old_id, Some(old.id));
        }
    }

    #[tokio::test]
    async fn test_run_does_not_touch_input() {
        let (_data, pipeline) = pipeline();
        let batch = records(&pipeline, &["a", "b"]);
        let before: Vec<_> = batch.iter().map(|r| (r.id, r.current_path.clone())).collect();

        pipeline.run(&batch, Touch).await.unwrap();

        let after: Vec<_> = batch.iter().map(|r| (r.id, r.current_path.clone())).collect();
        assert_eq!(before, after);
        assert!(batch.iter().all(ImageRecord::succeeded));
    }

    #[tokio::test]
    async fn test_passthrough_keeps_records() {
        let (_data, pipeline) = pipeline();
        let batch = records(&pipeline, &["a", "b"]);

        let partition = pipeline.run(&batch, Validate).await.unwrap();

        assert_eq!(partition.succeeded_new.len(), 2);
        assert!(partition.superseded_old.is_empty());
        assert_eq!(partition.succeeded_new[0].id, batch[0].id);
        assert_eq!(partition.succeeded_new[1].id, batch[1].id);
    }

    #[tokio::test]
    async fn test_chained_runs_build_ancestry() {
        let (_data, pipeline) = pipeline();
        let batch = records(&pipeline, &["a"]);

        let first = pipeline.run(&batch, Touch).await.unwrap();
        let second = pipeline.run(&first.succeeded_new, Touch).await.unwrap();

        let last = &second.succeeded_new[0];
        assert_eq!(last.old_id, Some(first.succeeded_new[0].id));
        assert_eq!(first.succeeded_new[0].old_id, Some(batch[0].id));
    }
}
