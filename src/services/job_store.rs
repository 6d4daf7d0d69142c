use crate::models::{JobSnapshot, JobStatus, Operation, RowError, RowResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory job registry shared by the upload handler, the runner and pollers.
/// Cloning is cheap; all clones see the same jobs.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<Uuid, JobSnapshot>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queued job and returns its id
    pub fn create(&self, operation: Operation) -> Uuid {
        let job_id = Uuid::new_v4();
        self.jobs.insert(
            job_id,
            JobSnapshot {
                job_id,
                operation,
                status: JobStatus::Queued,
                total: 0,
                done: 0,
                succeeded: 0,
                errors: Vec::new(),
                results: Vec::new(),
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
        );
        job_id
    }

    pub fn get(&self, job_id: &Uuid) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|job| job.value().clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn remove(&self, job_id: &Uuid) -> Option<JobSnapshot> {
        self.jobs.remove(job_id).map(|(_, job)| job)
    }

    fn update<F>(&self, job_id: &Uuid, f: F)
    where
        F: FnOnce(&mut JobSnapshot),
    {
        match self.jobs.get_mut(job_id) {
            Some(mut job) => f(job.value_mut()),
            None => tracing::warn!("Update for unknown job {}", job_id),
        }
    }

    pub fn mark_running(&self, job_id: &Uuid) {
        self.update(job_id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        });
    }

    /// Counts one more row submitted for processing
    pub fn add_row(&self, job_id: &Uuid) {
        self.update(job_id, |job| job.total += 1);
    }

    pub fn record_success(&self, job_id: &Uuid, result: RowResult) {
        self.update(job_id, |job| {
            job.succeeded += 1;
            job.done += 1;
            job.results.push(result);
        });
    }

    pub fn record_failure(&self, job_id: &Uuid, error: RowError) {
        self.update(job_id, |job| {
            job.done += 1;
            job.errors.push(error);
        });
    }

    /// Adds an error entry that does not correspond to a submitted row
    pub fn note_error(&self, job_id: &Uuid, error: RowError) {
        self.update(job_id, |job| job.errors.push(error));
    }

    /// Closes the job once every submitted row is done
    pub fn finish(&self, job_id: &Uuid) {
        self.update(job_id, |job| {
            debug_assert_eq!(job.done, job.total);
            job.status = if job.errors.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::CompletedWithErrors
            };
            job.finished_at = Some(Utc::now());
        });
    }

    pub fn fail(&self, job_id: &Uuid, error: RowError) {
        self.update(job_id, |job| {
            job.status = JobStatus::Failed;
            job.errors.push(error);
            job.finished_at = Some(Utc::now());
        });
    }

    /// Drops terminal jobs that finished before `cutoff`. Returns how many were removed.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
        });
        before.saturating_sub(self.jobs.len())
    }
}
