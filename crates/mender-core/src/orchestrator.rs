//! The healing state machine.
//!
//! Drives one job through diagnosis, fix generation, validation, and the
//! retry/escalation routing between them. Every external call and every
//! parse step is absorbed into the job's error log; the orchestrator never
//! terminates abnormally. Escalation is the safe fallback whenever
//! confidence cannot be established or validation cannot pass within the
//! attempt budget.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::agent::{CompletionRequest, ReasoningBackend};
use crate::harness::ValidationHarness;
use crate::parse;
use crate::prompt;
use crate::types::{
    ErrorKind, FailureCategory, FailureContext, HealEvent, HealState, JobStatus, ValidationResult,
};

/// Minimum diagnosis confidence (strict) required to attempt a fix.
/// Acting automatically on a low-confidence read of an error is unsafe.
pub const CONFIDENCE_FLOOR: f64 = 0.3;

const DIAGNOSIS_MAX_TOKENS: u32 = 1024;
const FIX_MAX_TOKENS: u32 = 4096;

/// Per-attempt temperature bump for fix generation, capped so retries vary
/// without drifting.
const TEMPERATURE_STEP: f32 = 0.15;
const TEMPERATURE_CEILING: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnoseRoute {
    Generate,
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateRoute {
    Resolve,
    Retry,
    Escalate,
}

pub struct Orchestrator {
    backend: Arc<dyn ReasoningBackend>,
    harness: ValidationHarness,
    pub event_tx: broadcast::Sender<HealEvent>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        harness: ValidationHarness,
    ) -> (Self, broadcast::Receiver<HealEvent>) {
        let (tx, rx) = broadcast::channel(256);
        (
            Self {
                backend,
                harness,
                event_tx: tx,
            },
            rx,
        )
    }

    fn emit(&self, event: HealEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Advance the job status, treating an illegal edge as a caller-logic
    /// defect rather than a crash. Returns false when the edge is illegal.
    fn advance(&self, state: &mut HealState, to: JobStatus) -> bool {
        match state.advance(to) {
            Ok(()) => {
                self.emit(HealEvent::StatusChanged {
                    job_id: state.context.job_id.clone(),
                    status: to,
                });
                true
            }
            Err(e) => {
                warn!(job_id = %state.context.job_id, "{e}");
                state.record_error(ErrorKind::MissingPrecondition, e.to_string());
                false
            }
        }
    }

    // ── Pipeline steps ────────────────────────────────────────────────────

    /// Ask the reasoning service to classify the failure. Any call or parse
    /// failure is recorded and leaves `diagnosis` unset; never raised.
    pub async fn diagnose(&self, state: &mut HealState) {
        if !self.advance(state, JobStatus::Diagnosing) {
            return;
        }
        info!(job_id = %state.context.job_id, "diagnosing failure");

        let request = CompletionRequest {
            prompt: prompt::diagnosis_prompt(&state.context),
            max_tokens: DIAGNOSIS_MAX_TOKENS,
            temperature: 0.0,
        };

        let raw = match self.backend.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(job_id = %state.context.job_id, "diagnosis call failed: {e:#}");
                state.record_error(ErrorKind::ServiceUnavailable, format!("diagnose: {e:#}"));
                return;
            }
        };

        match parse::parse_diagnosis(&raw) {
            Ok(diagnosis) => {
                info!(
                    job_id = %state.context.job_id,
                    failure_type = diagnosis.failure_type.as_str(),
                    confidence = diagnosis.confidence,
                    "diagnosis complete"
                );
                state.diagnosis = Some(diagnosis);
            }
            Err(e) => {
                warn!(job_id = %state.context.job_id, "diagnosis response rejected: {e}");
                state.record_error(ErrorKind::MalformedResponse, format!("diagnose: {e}"));
            }
        }
    }

    /// Generate only when a diagnosis exists and clears the confidence
    /// floor (strictly). Exactly the floor escalates.
    pub fn route_after_diagnose(&self, state: &HealState) -> DiagnoseRoute {
        match &state.diagnosis {
            Some(d) if d.confidence > CONFIDENCE_FLOOR => DiagnoseRoute::Generate,
            _ => DiagnoseRoute::Escalate,
        }
    }

    /// Ask the reasoning service for a candidate patch set. Requires a
    /// diagnosis; calling without one records a MissingPrecondition and
    /// leaves the state otherwise unchanged.
    pub async fn generate_fix(&self, state: &mut HealState) {
        let Some(diagnosis) = state.diagnosis.clone() else {
            warn!(job_id = %state.context.job_id, "generate_fix called without a diagnosis");
            state.record_error(
                ErrorKind::MissingPrecondition,
                "generate_fix called without a diagnosis",
            );
            return;
        };
        if !self.advance(state, JobStatus::Generating) {
            return;
        }
        info!(job_id = %state.context.job_id, attempt = state.attempt, "generating fix");

        let temperature = (state.attempt as f32 * TEMPERATURE_STEP).min(TEMPERATURE_CEILING);
        let request = CompletionRequest {
            prompt: prompt::fix_prompt(
                &state.context,
                &diagnosis,
                state.attempt,
                state.validation.as_ref(),
            ),
            max_tokens: FIX_MAX_TOKENS,
            temperature,
        };

        let raw = match self.backend.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(job_id = %state.context.job_id, attempt = state.attempt, "fix call failed: {e:#}");
                state.record_error(
                    ErrorKind::ServiceUnavailable,
                    format!("generate_fix attempt {}: {e:#}", state.attempt),
                );
                return;
            }
        };

        match parse::parse_patchset(&raw) {
            Ok(fix) => {
                info!(
                    job_id = %state.context.job_id,
                    files = fix.patches.len(),
                    confidence = fix.confidence,
                    "fix generated"
                );
                state.fix = Some(fix);
            }
            Err(e) => {
                warn!(job_id = %state.context.job_id, "fix response rejected: {e}");
                state.record_error(
                    ErrorKind::MalformedResponse,
                    format!("generate_fix attempt {}: {e}", state.attempt),
                );
            }
        }
    }

    /// Run the current patch set through the harness and store the result
    /// unconditionally. Harness setup failures arrive as `passed=false`
    /// with a distinguishing error and are recorded as such.
    pub async fn validate(&self, state: &mut HealState) {
        if !self.advance(state, JobStatus::Validating) {
            return;
        }
        info!(job_id = %state.context.job_id, attempt = state.attempt, "validating fix");

        let result = match (&state.fix, &state.diagnosis) {
            (Some(fix), Some(diagnosis)) => {
                let report = self
                    .harness
                    .verify(
                        Path::new(&state.context.repo_path),
                        fix,
                        diagnosis.failure_type,
                        &state.context.job_id,
                    )
                    .await;
                if !report.tested {
                    state.record_error(
                        ErrorKind::HarnessSetupFailure,
                        report
                            .error
                            .clone()
                            .unwrap_or_else(|| "sandbox setup failed".to_string()),
                    );
                } else if !report.passed {
                    state.record_error(
                        ErrorKind::CheckFailure,
                        format!(
                            "validation attempt {}: {}",
                            state.attempt,
                            report
                                .error
                                .clone()
                                .unwrap_or_else(|| "checks failed".to_string())
                        ),
                    );
                }
                report.to_validation_result()
            }
            _ => {
                state.record_error(
                    ErrorKind::CheckFailure,
                    format!("validation attempt {}: no patch set to validate", state.attempt),
                );
                ValidationResult {
                    passed: false,
                    output: String::new(),
                    duration_ms: 0,
                    error: Some("no patch set to validate".to_string()),
                }
            }
        };

        info!(
            job_id = %state.context.job_id,
            passed = result.passed,
            duration_ms = result.duration_ms,
            "validation complete"
        );
        state.validation = Some(result);
    }

    /// Validation outcome, not confidence, is the ground truth here. A
    /// failed validation consumes one attempt; the budget bounds the number
    /// of generate/validate cycles at `max_attempts`.
    pub fn route_after_validate(&self, state: &mut HealState) -> ValidateRoute {
        if state.validation.as_ref().is_some_and(|v| v.passed) {
            return ValidateRoute::Resolve;
        }
        if state.attempt < state.max_attempts - 1 {
            state.attempt += 1;
            ValidateRoute::Retry
        } else {
            ValidateRoute::Escalate
        }
    }

    fn escalate(&self, state: &mut HealState) {
        warn!(job_id = %state.context.job_id, errors = state.errors.len(), "escalating to human review");
        self.advance(state, JobStatus::Escalating);
        self.emit(HealEvent::Escalated {
            job_id: state.context.job_id.clone(),
            failure_type: state.diagnosis.as_ref().map(|d| d.failure_type),
            errors: state.errors.clone(),
        });
        self.advance(state, JobStatus::Failed);
    }

    // ── Job driver ────────────────────────────────────────────────────────

    /// Run the complete pipeline for one ingested failure. Always returns a
    /// state routed to Resolved (ready for delivery) or driven to Failed.
    pub async fn run(&self, context: FailureContext, max_attempts: u32) -> HealState {
        let mut state = HealState::new(context, max_attempts);
        self.emit(HealEvent::JobStarted {
            job_id: state.context.job_id.clone(),
            repo: state.context.repo.clone(),
        });
        info!(
            job_id = %state.context.job_id,
            repo = %state.context.repo,
            max_attempts = state.max_attempts,
            "starting healing job"
        );

        self.diagnose(&mut state).await;
        if self.route_after_diagnose(&state) == DiagnoseRoute::Escalate {
            warn!(job_id = %state.context.job_id, "no usable diagnosis, escalating");
            self.escalate(&mut state);
            return state;
        }

        loop {
            self.generate_fix(&mut state).await;
            self.validate(&mut state).await;
            match self.route_after_validate(&mut state) {
                ValidateRoute::Resolve => {
                    self.advance(&mut state, JobStatus::Resolved);
                    let duration_ms = state.elapsed_ms();
                    info!(
                        job_id = %state.context.job_id,
                        attempt = state.attempt,
                        duration_ms,
                        "job resolved"
                    );
                    self.emit(HealEvent::Resolved {
                        job_id: state.context.job_id.clone(),
                        failure_type: state
                            .diagnosis
                            .as_ref()
                            .map(|d| d.failure_type)
                            .unwrap_or(FailureCategory::RuntimeError),
                        duration_ms,
                        pr_url: state.pr_url.clone(),
                    });
                    return state;
                }
                ValidateRoute::Retry => {
                    info!(
                        job_id = %state.context.job_id,
                        attempt = state.attempt,
                        "validation failed, retrying"
                    );
                }
                ValidateRoute::Escalate => {
                    state.record_error(
                        ErrorKind::ExhaustedRetries,
                        format!(
                            "validation did not pass within {} attempts",
                            state.max_attempts
                        ),
                    );
                    self.escalate(&mut state);
                    return state;
                }
            }
        }
    }
}
