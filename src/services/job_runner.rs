use crate::config::AppConfig;
use crate::models::{CsvRow, Operation, RowError, RowResult};
use crate::services::csv_intake::{StagedUpload, row_identifier, visit_rows};
use crate::services::job_store::JobStore;
use crate::services::litmos::UserDirectory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use uuid::Uuid;

/// Processes staged uploads row by row against the user directory.
///
/// Two gates bound the work across all jobs: in-flight permits are taken
/// before a row is submitted, worker permits before a row calls the API.
/// Rows are streamed from the file through a single-slot channel, so the
/// reader stalls while the in-flight gate is full.
pub struct JobRunner {
    directory: Arc<dyn UserDirectory>,
    store: JobStore,
    workers: Arc<Semaphore>,
    inflight: Arc<Semaphore>,
    max_records: usize,
    op_delay: Duration,
}

impl JobRunner {
    pub fn new(directory: Arc<dyn UserDirectory>, store: JobStore, config: &AppConfig) -> Self {
        Self {
            directory,
            store,
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            inflight: Arc::new(Semaphore::new(config.max_inflight.max(1))),
            max_records: config.max_records,
            op_delay: config.user_op_delay,
        }
    }

    /// Runs the job on the tokio runtime. The staged file is removed when the job ends.
    pub fn spawn(
        self: &Arc<Self>,
        job_id: Uuid,
        upload: StagedUpload,
        operation: Operation,
    ) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run(job_id, upload, operation).await })
    }

    pub async fn run(&self, job_id: Uuid, upload: StagedUpload, operation: Operation) {
        tracing::info!(
            "⚙️  Job {}: {} starting (file={})",
            job_id,
            operation,
            upload.original_name()
        );
        self.store.mark_running(&job_id);

        let path = upload.path().to_path_buf();
        let limit = self.max_records;
        let (row_tx, mut row_rx) = mpsc::channel::<CsvRow>(1);
        let reader = tokio::task::spawn_blocking(move || {
            visit_rows(&path, limit, |row| row_tx.blocking_send(row).is_ok())
        });

        let mut tasks = JoinSet::new();
        let mut row_index = 0;

        while let Some(row) = row_rx.recv().await {
            self.store.add_row(&job_id);

            let Ok(inflight) = Arc::clone(&self.inflight).acquire_owned().await else {
                self.store.record_failure(
                    &job_id,
                    RowError::for_row(row_index, "runner is shutting down", row),
                );
                row_index += 1;
                continue;
            };

            let directory = Arc::clone(&self.directory);
            let workers = Arc::clone(&self.workers);
            let guard = RowGuard::new(self.store.clone(), job_id, row_index);

            tasks.spawn(async move {
                let _inflight = inflight;
                let _worker = workers.acquire_owned().await;
                let outcome = process_row(directory.as_ref(), row_index, row, operation).await;
                guard.settle(outcome);
            });
            row_index += 1;

            if !self.op_delay.is_zero() {
                sleep(self.op_delay).await;
            }
        }

        let read_error = match reader.await {
            Ok(Ok(summary)) => {
                if summary.truncated {
                    self.store.note_error(
                        &job_id,
                        RowError::skipped(
                            summary.rows,
                            format!("skipped due to MAX_RECORDS ({})", self.max_records),
                        ),
                    );
                }
                None
            }
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(e) => Some(e.to_string()),
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Unhandled failure in per-row worker for job {}: {}", job_id, e);
            }
        }

        if let Some(message) = read_error {
            drop(upload);
            tracing::error!("Job {} failed while reading file: {}", job_id, message);
            self.store.fail(&job_id, RowError::background(message));
            return;
        }

        drop(upload);
        tracing::debug!("Removed staged upload for job {}", job_id);

        self.store.finish(&job_id);

        if let Some(job) = self.store.get(&job_id) {
            tracing::info!(
                "✅ Job {} completed: done={} succeeded={} errors={}",
                job_id,
                job.done,
                job.succeeded,
                job.errors.len()
            );
        }
    }
}

async fn process_row(
    directory: &dyn UserDirectory,
    row_index: usize,
    row: CsvRow,
    operation: Operation,
) -> Result<RowResult, RowError> {
    let Some(identifier) = row_identifier(&row) else {
        return Err(RowError::for_row(row_index, "missing identifier", row));
    };

    match directory.apply_action(&identifier, operation).await {
        Ok(receipt) => Ok(RowResult {
            row_index,
            identifier,
            status_code: receipt.status_code,
        }),
        Err(e) => {
            tracing::warn!("Row {} ({}) failed: {}", row_index, identifier, e);
            Err(RowError::for_row(row_index, e.to_string(), row))
        }
    }
}

/// Makes sure a submitted row is counted as done exactly once, even when
/// its task dies before reporting. A panicking task settles through `Drop`
/// while unwinding, so no profile may set `panic = "abort"`.
struct RowGuard {
    store: JobStore,
    job_id: Uuid,
    row_index: usize,
    settled: bool,
}

impl RowGuard {
    fn new(store: JobStore, job_id: Uuid, row_index: usize) -> Self {
        Self {
            store,
            job_id,
            row_index,
            settled: false,
        }
    }

    fn settle(mut self, outcome: Result<RowResult, RowError>) {
        match outcome {
            Ok(result) => self.store.record_success(&self.job_id, result),
            Err(error) => self.store.record_failure(&self.job_id, error),
        }
        self.settled = true;
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.store.record_failure(
                &self.job_id,
                RowError::skipped(self.row_index, "row worker stopped before finishing"),
            );
        }
    }
}
