mod config;
mod metrics;
mod pipeline;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use extract::{Extractor, GenerationClient, OpenAiBackend, RetryPolicy};
use ingest::{HttpFetcher, PubMedAdapter};
use query::{PositionRecord, SubjectProfile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use crate::pipeline::{CoworkerPipeline, CoworkerReport, GenePipeline, GeneReport, PipelineContext, PipelineError};

#[derive(Clone)]
struct AppState {
    ctx: PipelineContext,
    metrics: Arc<Metrics>,
    model: String,
    /// Parent of every per-request token.
    shutdown: CancellationToken,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    model: String,
}

#[derive(Deserialize)]
struct GeneAnalysisRequest {
    topic: String,
}

#[derive(Deserialize)]
struct CoworkerRequest {
    first_name: String,
    last_name: String,
    positions: Vec<PositionRecord>,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::EmptyTopic | PipelineError::Query(_) => StatusCode::BAD_REQUEST,
            PipelineError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Generation(_) | PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let state = build_state(&config)?;
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!(
        addr = %config.server.bind_addr,
        model = %config.generation.sampling.model,
        max_pages = config.scrape.max_pages,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down, cancelling in-flight requests");
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt().json().init();
    } else {
        tracing_subscriber::fmt::init();
    }
}

fn build_state(config: &AppConfig) -> Result<AppState> {
    let fetcher = HttpFetcher::new(config.scrape.fetch_timeout()).context("Failed to build HTTP fetcher")?;

    let backend = OpenAiBackend::new(
        &config.generation.api_key,
        &config.generation.base_url,
        config.generation.request_timeout(),
    )
    .context("Failed to build generation backend")?;

    let client = GenerationClient::new(
        Arc::new(backend),
        config.generation.sampling.clone(),
        RetryPolicy::from(&config.retry),
    );

    Ok(AppState {
        ctx: PipelineContext {
            fetcher: Arc::new(fetcher),
            adapter: Arc::new(PubMedAdapter::new()),
            extractor: Extractor::new(client, config.response_schema()),
            prompts: Arc::new(config.prompts.clone()),
            scrape: config.scrape.clone(),
        },
        metrics: Metrics::new(),
        model: config.generation.sampling.model.clone(),
        shutdown: CancellationToken::new(),
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/gene-analysis", post(gene_analysis))
        .route("/coworkers", post(coworker_search))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.model.clone(),
    })
}

async fn get_stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn gene_analysis(
    State(state): State<AppState>,
    payload: Result<Json<GeneAnalysisRequest>, JsonRejection>,
) -> Result<Json<GeneReport>, ApiError> {
    let Json(req) = payload?;
    let request_id = Uuid::new_v4();
    let span = info_span!("gene_analysis", %request_id, topic = %req.topic);
    let cancel = state.shutdown.child_token();
    let timer = TimedOperation::start();

    let mut pipeline = GenePipeline::new(state.ctx.clone());
    let result = pipeline
        .run(&req.topic, &cancel, |progress| {
            debug!(
                page = progress.page,
                total = progress.total,
                fraction = progress.fraction(),
                "Walk progress"
            );
        })
        .instrument(span)
        .await;

    state.metrics.record_request(result.is_ok());
    let report = result?;
    state.metrics.record_gene_run(timer.elapsed(), &report);

    Ok(Json(report))
}

async fn coworker_search(
    State(state): State<AppState>,
    payload: Result<Json<CoworkerRequest>, JsonRejection>,
) -> Result<Json<CoworkerReport>, ApiError> {
    let Json(req) = payload?;
    let request_id = Uuid::new_v4();
    let profile = SubjectProfile::new(req.first_name, req.last_name);
    let span = info_span!("coworker_search", %request_id, name = %profile.full_name());
    let cancel = state.shutdown.child_token();
    let timer = TimedOperation::start();

    let pipeline = CoworkerPipeline::new(state.ctx.clone());
    let result = pipeline
        .run(&profile, &req.positions, &cancel)
        .instrument(span)
        .await;

    state.metrics.record_request(result.is_ok());
    let report = result?;
    state.metrics.record_coworker_run(timer.elapsed(), &report);

    Ok(Json(report))
}
