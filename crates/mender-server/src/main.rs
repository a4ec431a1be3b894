mod deliver;
mod routes;
mod store;
mod webhooks;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use mender_agent::{AnthropicBackend, OllamaBackend};
use mender_core::{
    agent::ReasoningBackend,
    config::Config,
    harness::ValidationHarness,
    orchestrator::Orchestrator,
    types::HealEvent,
};
use tokio::sync::{broadcast, Semaphore};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::routes::AppState;
use crate::store::JobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mender_server=info,mender_core=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Select the reasoning backend based on BACKEND env var.
    let backend: Arc<dyn ReasoningBackend> = match config.backend.as_str() {
        "ollama" => Arc::new(
            OllamaBackend::new(&config.ollama_base_url, &config.ollama_model)
                .with_timeout(config.request_timeout_s),
        ),
        _ => {
            if config.anthropic_api_key.is_empty() {
                warn!("ANTHROPIC_API_KEY not set - reasoning calls will fail");
            }
            Arc::new(
                AnthropicBackend::new(&config.anthropic_api_key, &config.model)
                    .with_base_url(&config.anthropic_base_url)
                    .with_timeout(config.request_timeout_s),
            )
        }
    };

    let harness = ValidationHarness::new(config.tech_stack);
    let (orchestrator, event_rx) = Orchestrator::new(backend, harness);

    let (event_json_tx, _keepalive_rx) = broadcast::channel::<String>(256);

    // Forward orchestrator events to the SSE stream and metrics counters.
    {
        let tx = event_json_tx.clone();
        tokio::spawn(async move {
            let mut rx = event_rx;
            loop {
                match rx.recv().await {
                    Ok(evt) => {
                        match &evt {
                            HealEvent::Resolved {
                                failure_type,
                                duration_ms,
                                ..
                            } => {
                                metrics::increment_counter!(
                                    "mender_jobs_resolved_total",
                                    "failure_type" => failure_type.as_str()
                                );
                                metrics::histogram!(
                                    "mender_fix_time_seconds",
                                    *duration_ms as f64 / 1000.0
                                );
                            }
                            HealEvent::Escalated { failure_type, .. } => {
                                let label =
                                    failure_type.map(|f| f.as_str()).unwrap_or("unknown");
                                metrics::increment_counter!(
                                    "mender_jobs_escalated_total",
                                    "failure_type" => label
                                );
                            }
                            _ => {}
                        }
                        if let Ok(data) = serde_json::to_string(&evt) {
                            let _ = tx.send(data);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
    }

    let bind = config.web_bind.clone();
    let port = config.web_port;
    let worker_slots = Semaphore::new(config.worker_concurrency as usize);

    let state = Arc::new(AppState {
        config,
        store: JobStore::new(),
        orchestrator,
        worker_slots,
        event_json_tx,
        start_time: Instant::now(),
    });

    let app = Router::new()
        // Health
        .route("/api/health", get(routes::health))
        .route("/api/ready", get(routes::ready))
        // Webhooks
        .route("/api/webhooks/github", post(routes::webhook_github))
        .route("/api/webhooks/gitlab", post(routes::webhook_gitlab))
        .route("/api/webhooks/jenkins", post(routes::webhook_jenkins))
        .route("/api/webhooks/circleci", post(routes::webhook_circleci))
        // Manual trigger
        .route("/api/simulate", post(routes::simulate))
        // Jobs
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/:id", get(routes::get_job))
        // Metrics
        .route("/api/metrics/summary", get(routes::metrics_summary))
        // SSE events
        .route("/api/events", get(routes::sse_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{bind}:{port}");
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
