//! Scoped in-memory job store.
//!
//! Passed by reference (behind `Arc`) to each job's lifecycle instead of
//! living in process-global state, so concurrent jobs never share mutable
//! globals.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mender_core::types::{FailureCategory, FailureContext, HealState, JobStatus};
use serde::Serialize;
use tokio::sync::RwLock;

/// A job as exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub repo: String,
    pub branch: String,
    pub provider: String,
    pub status: JobStatus,
    pub failure_type: Option<FailureCategory>,
    pub root_cause: Option<String>,
    /// Number of fix-generation/validation cycles consumed (1-based).
    pub attempts: u32,
    pub pr_url: Option<String>,
    pub error_count: usize,
    pub created_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

impl JobRecord {
    pub fn ingested(context: &FailureContext) -> Self {
        Self {
            id: context.job_id.clone(),
            repo: context.repo.clone(),
            branch: context.branch.clone(),
            provider: context.provider.clone(),
            status: JobStatus::Ingesting,
            failure_type: None,
            root_cause: None,
            attempts: 0,
            pr_url: None,
            error_count: 0,
            created_at: Utc::now(),
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub resolved: usize,
    pub escalated: usize,
    pub processing: usize,
    pub success_rate: f64,
    pub avg_fix_time_ms: f64,
}

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: JobRecord) {
        self.jobs.write().await.insert(record.id.clone(), record);
    }

    /// Fold a job's state into its record. Called on status changes and at
    /// terminal handoff.
    pub async fn apply_state(&self, state: &HealState) {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(&state.context.job_id) {
            record.status = state.status;
            record.failure_type = state.diagnosis.as_ref().map(|d| d.failure_type);
            record.root_cause = state.diagnosis.as_ref().map(|d| d.root_cause.clone());
            record.attempts = state.attempt + 1;
            record.pr_url = state.pr_url.clone();
            record.error_count = state.errors.len();
            if state.status.is_terminal() {
                record.duration_ms = Some(state.elapsed_ms());
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn stats(&self) -> StoreStats {
        let jobs = self.jobs.read().await;
        let total = jobs.len();
        let resolved = jobs
            .values()
            .filter(|j| j.status == JobStatus::Done)
            .count();
        let escalated = jobs
            .values()
            .filter(|j| j.status == JobStatus::Failed)
            .count();
        let processing = jobs.values().filter(|j| !j.status.is_terminal()).count();

        let fix_times: Vec<u64> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Done)
            .filter_map(|j| j.duration_ms)
            .collect();
        let avg_fix_time_ms = if fix_times.is_empty() {
            0.0
        } else {
            fix_times.iter().sum::<u64>() as f64 / fix_times.len() as f64
        };
        let success_rate = if total == 0 {
            0.0
        } else {
            resolved as f64 / total as f64 * 100.0
        };

        StoreStats {
            total,
            resolved,
            escalated,
            processing,
            success_rate,
            avg_fix_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_context(job_id: &str) -> FailureContext {
        FailureContext {
            job_id: job_id.into(),
            repo: "acme/web-ui".into(),
            repo_path: "/srv/web-ui".into(),
            provider: "github".into(),
            commit_sha: "abc".into(),
            branch: "main".into(),
            error_log: "boom".into(),
            pipeline_url: String::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = JobStore::new();
        store.insert(JobRecord::ingested(&make_context("a1"))).await;
        let record = store.get("a1").await.expect("record");
        assert_eq!(record.repo, "acme/web-ui");
        assert_eq!(record.status, JobStatus::Ingesting);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let store = JobStore::new();
        let mut older = JobRecord::ingested(&make_context("old"));
        older.created_at = older.created_at - Duration::seconds(60);
        store.insert(older).await;
        store.insert(JobRecord::ingested(&make_context("new"))).await;

        let jobs = store.list().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "new");
        assert_eq!(jobs[1].id, "old");
    }

    #[tokio::test]
    async fn apply_state_folds_outcome_into_the_record() {
        let store = JobStore::new();
        let context = make_context("a1");
        store.insert(JobRecord::ingested(&context)).await;

        let mut state = HealState::new(context, 3);
        state.attempt = 1;
        state.record_error(
            mender_core::types::ErrorKind::CheckFailure,
            "validation attempt 0: checks failed",
        );
        state.status = JobStatus::Failed;
        store.apply_state(&state).await;

        let record = store.get("a1").await.expect("record");
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.error_count, 1);
        assert!(record.duration_ms.is_some(), "terminal records get a duration");
    }

    #[tokio::test]
    async fn stats_count_terminal_and_processing_jobs() {
        let store = JobStore::new();
        let mut done = JobRecord::ingested(&make_context("done"));
        done.status = JobStatus::Done;
        done.duration_ms = Some(4_000);
        store.insert(done).await;

        let mut failed = JobRecord::ingested(&make_context("failed"));
        failed.status = JobStatus::Failed;
        store.insert(failed).await;

        store.insert(JobRecord::ingested(&make_context("live"))).await;

        let stats = store.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.escalated, 1);
        assert_eq!(stats.processing, 1);
        assert!((stats.avg_fix_time_ms - 4_000.0).abs() < f64::EPSILON);
        assert!((stats.success_rate - 100.0 / 3.0).abs() < 0.01);
    }
}
