use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use mender_core::{config::Config, orchestrator::Orchestrator, types::{FailureContext, JobStatus}};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::deliver;
use crate::store::{JobRecord, JobStore};
use crate::webhooks;

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub config: Config,
    pub store: JobStore,
    pub orchestrator: Orchestrator,
    /// Bounds concurrently running healing jobs.
    pub worker_slots: Semaphore,
    pub event_json_tx: broadcast::Sender<String>,
    pub start_time: Instant,
}

// ── Job runner ────────────────────────────────────────────────────────────

/// Drive one ingested failure to a terminal status as an independent task:
/// orchestrate, deliver on Resolved, fold the final state into the store.
pub fn spawn_job(app: Arc<AppState>, context: FailureContext) {
    tokio::spawn(async move {
        let job_id = context.job_id.clone();
        app.store.insert(JobRecord::ingested(&context)).await;

        let Ok(_permit) = app.worker_slots.acquire().await else {
            warn!(job_id = %job_id, "worker pool closed, dropping job");
            return;
        };

        let mut state = app
            .orchestrator
            .run(context, app.config.max_attempts)
            .await;

        if state.status == JobStatus::Resolved {
            if app.config.delivery_enabled {
                match deliver::deliver_fix(&app.config, &state).await {
                    Ok(url) => state.pr_url = Some(url),
                    // Reported, not escalated: the healing already succeeded.
                    Err(e) => warn!(job_id = %job_id, "fix delivery failed: {e:#}"),
                }
            }
            if let Err(e) = state.advance(JobStatus::Done) {
                warn!(job_id = %job_id, "{e}");
            }
        }

        app.store.apply_state(&state).await;
        info!(job_id = %job_id, status = state.status.as_str(), "job finished");
    });
}

// ── Health ────────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mender",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn ready() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}

// ── Webhooks ──────────────────────────────────────────────────────────────

fn accepted(provider: &str) -> Json<Value> {
    Json(json!({ "status": "accepted", "provider": provider }))
}

fn ingest(app: &Arc<AppState>, context: Option<FailureContext>) {
    if let Some(ctx) = context {
        info!(job_id = %ctx.job_id, repo = %ctx.repo, provider = %ctx.provider, "failure job created");
        spawn_job(Arc::clone(app), ctx);
    }
}

pub async fn webhook_github(
    State(app): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    metrics::increment_counter!("mender_webhook_events_total", "provider" => "github");
    info!("github webhook received");
    ingest(&app, webhooks::github_failure(&body, &app.config.repo_path));
    accepted("github")
}

pub async fn webhook_gitlab(
    State(app): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    metrics::increment_counter!("mender_webhook_events_total", "provider" => "gitlab");
    info!("gitlab webhook received");
    ingest(&app, webhooks::gitlab_failure(&body, &app.config.repo_path));
    accepted("gitlab")
}

pub async fn webhook_jenkins(
    State(app): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    metrics::increment_counter!("mender_webhook_events_total", "provider" => "jenkins");
    info!("jenkins webhook received");
    ingest(&app, webhooks::jenkins_failure(&body, &app.config.repo_path));
    accepted("jenkins")
}

pub async fn webhook_circleci(
    State(app): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    metrics::increment_counter!("mender_webhook_events_total", "provider" => "circleci");
    info!("circleci webhook received");
    ingest(&app, webhooks::circleci_failure(&body, &app.config.repo_path));
    accepted("circleci")
}

// ── Manual trigger ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SimulateBody {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub failure_type: Option<String>,
    pub error_log: Option<String>,
}

pub async fn simulate(
    State(app): State<Arc<AppState>>,
    Json(body): Json<SimulateBody>,
) -> (StatusCode, Json<Value>) {
    let failure_kind = body
        .failure_type
        .unwrap_or_else(|| "syntax_error".to_string());
    let context = FailureContext {
        job_id: webhooks::new_job_id(),
        repo: body.repo.unwrap_or_else(|| app.config.repo.clone()),
        repo_path: app.config.repo_path.clone(),
        provider: "simulated".to_string(),
        commit_sha: String::new(),
        branch: body.branch.unwrap_or_else(|| "main".to_string()),
        error_log: body
            .error_log
            .unwrap_or_else(|| format!("Simulated {failure_kind} failure")),
        pipeline_url: String::new(),
    };
    let job_id = context.job_id.clone();

    info!(job_id = %job_id, failure_type = %failure_kind, "simulating CI failure");
    spawn_job(Arc::clone(&app), context);

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "status": "queued",
            "message": "Healing job enqueued. Agent will diagnose and fix.",
        })),
    )
}

// ── Jobs ──────────────────────────────────────────────────────────────────

pub async fn list_jobs(State(app): State<Arc<AppState>>) -> Json<Value> {
    let jobs = app.store.list().await;
    Json(json!({
        "jobs": jobs,
        "total": jobs.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn get_job(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match app.store.get(&id).await {
        Some(job) => Ok(Json(json!(job))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// ── Metrics summary ───────────────────────────────────────────────────────

pub async fn metrics_summary(State(app): State<Arc<AppState>>) -> Json<Value> {
    let stats = app.store.stats().await;
    // ~5 minutes of manual triage saved per auto-fixed failure.
    let time_saved_hours = stats.resolved as f64 * 5.0 / 60.0;
    Json(json!({
        "total_failures": stats.total,
        "auto_fixed": stats.resolved,
        "escalated": stats.escalated,
        "current_processing": stats.processing,
        "success_rate": (stats.success_rate * 10.0).round() / 10.0,
        "avg_fix_time_seconds": (stats.avg_fix_time_ms / 100.0).round() / 10.0,
        "time_saved_hours": (time_saved_hours * 10.0).round() / 10.0,
        "uptime_s": app.start_time.elapsed().as_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// ── SSE events ────────────────────────────────────────────────────────────

pub async fn sse_events(
    State(app): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = app.event_json_tx.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|msg| msg.ok().map(|data| Ok(Event::default().data(data))));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}
