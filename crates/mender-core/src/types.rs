use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Failure ingestion ────────────────────────────────────────────────────

/// Everything known about a CI failure at ingestion time.
/// Immutable once constructed; the orchestrator only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    pub job_id: String,
    /// Repository identity, e.g. "acme/web-ui".
    pub repo: String,
    /// Readable path to the current working tree. Never mutated by the core.
    pub repo_path: String,
    /// CI provider that reported the failure ("github", "gitlab", ...).
    pub provider: String,
    pub commit_sha: String,
    pub branch: String,
    /// Raw error output from the failed run.
    pub error_log: String,
    pub pipeline_url: String,
}

// ── Failure classification ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    SyntaxError,
    DepConflict,
    TypeError,
    ImportError,
    TestFailure,
    BuildError,
    ConfigError,
    RuntimeError,
}

impl FailureCategory {
    /// Wire/branch-name form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "syntax_error",
            Self::DepConflict => "dep_conflict",
            Self::TypeError => "type_error",
            Self::ImportError => "import_error",
            Self::TestFailure => "test_failure",
            Self::BuildError => "build_error",
            Self::ConfigError => "config_error",
            Self::RuntimeError => "runtime_error",
        }
    }
}

// ── Reasoning-service contracts ──────────────────────────────────────────

/// Structured root-cause classification returned by the diagnosis call.
/// Created once per attempt; replaced, never mutated, on retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub failure_type: FailureCategory,
    /// Precise single-sentence root cause.
    pub root_cause: String,
    pub affected_files: Vec<String>,
    /// 2-3 sentence human-readable summary.
    pub error_summary: String,
    /// In [0,1]; enforced by the response adapter.
    pub confidence: f64,
    pub suggested_approach: String,
}

/// One before/after file rewrite within a candidate fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePatch {
    pub filename: String,
    pub original_content: String,
    pub patched_content: String,
    pub explanation: String,
}

/// A generated candidate fix. Created once per fix-generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub patches: Vec<FilePatch>,
    pub explanation: String,
    pub test_commands: Vec<String>,
    /// In [0,1]; enforced by the response adapter.
    pub confidence: f64,
}

/// Verdict from one validation harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

// ── Job status ───────────────────────────────────────────────────────────

/// Closed set of orchestration states. Transitions are only legal along
/// the edges `can_transition` admits; `HealState::advance` is the single
/// place a status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ingesting,
    Diagnosing,
    Generating,
    Validating,
    Resolved,
    Escalating,
    Done,
    Failed,
}

impl JobStatus {
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            (Ingesting, Diagnosing)
                | (Diagnosing, Generating)
                | (Diagnosing, Escalating)
                | (Generating, Validating)
                | (Validating, Resolved)
                | (Validating, Generating)
                | (Validating, Escalating)
                | (Resolved, Done)
                | (Escalating, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingesting => "ingesting",
            Self::Diagnosing => "diagnosing",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Resolved => "resolved",
            Self::Escalating => "escalating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

// ── Error log ────────────────────────────────────────────────────────────

/// Taxonomy for the per-job error log. MissingPrecondition flags a
/// caller-logic defect; everything else is ordinary operational failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ServiceUnavailable,
    MalformedResponse,
    MissingPrecondition,
    HarnessSetupFailure,
    CheckFailure,
    ExhaustedRetries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ── Orchestration state ──────────────────────────────────────────────────

/// Mutable state of one healing job, exclusively owned by the orchestrator
/// until a terminal status is reached, then handed to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealState {
    pub context: FailureContext,
    pub status: JobStatus,
    /// 0-indexed fix-generation/validation cycle counter.
    pub attempt: u32,
    pub max_attempts: u32,
    pub diagnosis: Option<Diagnosis>,
    pub fix: Option<PatchSet>,
    pub validation: Option<ValidationResult>,
    pub pr_url: Option<String>,
    /// Append-only; entries are never removed or reordered.
    pub errors: Vec<ErrorEntry>,
    pub started_at: DateTime<Utc>,
}

impl HealState {
    pub fn new(context: FailureContext, max_attempts: u32) -> Self {
        Self {
            context,
            status: JobStatus::Ingesting,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            diagnosis: None,
            fix: None,
            validation: None,
            pr_url: None,
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Move to `to`, rejecting any edge not in the transition table.
    pub fn advance(&mut self, to: JobStatus) -> anyhow::Result<()> {
        if !JobStatus::can_transition(self.status, to) {
            anyhow::bail!(
                "illegal status transition {} -> {} for job {}",
                self.status.as_str(),
                to.as_str(),
                self.context.job_id
            );
        }
        self.status = to;
        Ok(())
    }

    pub fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(ErrorEntry::new(kind, message));
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

// ── Job events ───────────────────────────────────────────────────────────

/// Broadcast after each significant lifecycle change; terminal variants are
/// what the observability sink counts and times.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealEvent {
    JobStarted {
        job_id: String,
        repo: String,
    },
    StatusChanged {
        job_id: String,
        status: JobStatus,
    },
    Resolved {
        job_id: String,
        failure_type: FailureCategory,
        duration_ms: u64,
        pr_url: Option<String>,
    },
    Escalated {
        job_id: String,
        failure_type: Option<FailureCategory>,
        errors: Vec<ErrorEntry>,
    },
}

impl HealEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::StatusChanged { .. } => "status_changed",
            Self::Resolved { .. } => "resolved",
            Self::Escalated { .. } => "escalated",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::StatusChanged { job_id, .. }
            | Self::Resolved { job_id, .. }
            | Self::Escalated { job_id, .. } => job_id,
        }
    }
}
