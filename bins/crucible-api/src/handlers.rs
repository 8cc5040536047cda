// HTTP route handlers for the Crucible API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crucible_common::store::JobSummary;
use crucible_common::{Config, JobStatus, Language, LanguageRegistry, NewJob};

use crate::AppState;

/// Documented bounds for per-job overrides; values outside are rejected
pub const MIN_TIMEOUT_MS: i64 = 100;
pub const MAX_TIMEOUT_MS: i64 = 30_000;
pub const MIN_MEMORY_MIB: i64 = 16;
pub const MAX_MEMORY_MIB: i64 = 1_024;

const MAX_LIST_LIMIT: i64 = 100;

/// Required fields are optional here so a missing field gets the same
/// 400 `{error, detail?}` shape as any other validation failure.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub language: Option<String>,
    pub source_code: Option<String>,
    #[serde(default)]
    pub stdin: String,
    pub timeout_ms: Option<i64>,
    pub memory_limit_mib: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
        }
    }

    fn with_detail(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail.into()),
        }
    }
}

/// Validate a submission against the registry and the documented caps.
/// Purely local; nothing here touches the container runtime.
pub(crate) fn validate_submission(
    req: &SubmitRequest,
    registry: &LanguageRegistry,
    config: &Config,
) -> Result<NewJob, ErrorBody> {
    let language_id = req
        .language
        .as_deref()
        .ok_or_else(|| ErrorBody::new("language is required"))?;

    let language = Language::from_str(language_id)
        .filter(|lang| registry.get(*lang).is_ok())
        .ok_or_else(|| {
            let known: Vec<&str> = Language::all_variants().iter().map(|l| l.as_str()).collect();
            ErrorBody::with_detail(
                format!("unknown language: {language_id}"),
                format!("supported languages: {}", known.join(", ")),
            )
        })?;

    let source_code = req.source_code.as_deref().unwrap_or_default();
    if source_code.is_empty() {
        return Err(ErrorBody::new("source_code must not be empty"));
    }
    if source_code.len() > config.max_source_bytes {
        return Err(ErrorBody::with_detail(
            "source_code too large",
            format!("limit is {} bytes", config.max_source_bytes),
        ));
    }
    if req.stdin.len() > config.max_stdin_bytes {
        return Err(ErrorBody::with_detail(
            "stdin too large",
            format!("limit is {} bytes", config.max_stdin_bytes),
        ));
    }

    if let Some(timeout_ms) = req.timeout_ms {
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(ErrorBody::with_detail(
                "timeout_ms out of range",
                format!("allowed range is {MIN_TIMEOUT_MS}..={MAX_TIMEOUT_MS}"),
            ));
        }
    }
    if let Some(memory_limit_mib) = req.memory_limit_mib {
        if !(MIN_MEMORY_MIB..=MAX_MEMORY_MIB).contains(&memory_limit_mib) {
            return Err(ErrorBody::with_detail(
                "memory_limit_mib out of range",
                format!("allowed range is {MIN_MEMORY_MIB}..={MAX_MEMORY_MIB}"),
            ));
        }
    }

    Ok(NewJob {
        language,
        source_code: source_code.to_string(),
        stdin: req.stdin.clone(),
        timeout_ms: req.timeout_ms,
        memory_limit_mib: req.memory_limit_mib,
        cpu_quota: None,
    })
}

/// POST /submissions - validate and durably enqueue a job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    let new_job = match validate_submission(&payload, &state.registry, &state.config) {
        Ok(job) => job,
        Err(body) => return (StatusCode::BAD_REQUEST, Json(body)).into_response(),
    };

    match state.store.create(&new_job).await {
        Ok(job_id) => {
            info!(
                job_id = %job_id,
                language = %new_job.language,
                source_size = new_job.source_code.len(),
                "job queued"
            );
            (
                StatusCode::CREATED,
                Json(SubmitResponse {
                    job_id,
                    status: JobStatus::Pending,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to persist submission");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("failed to persist submission")),
            )
                .into_response()
        }
    }
}

/// GET /submissions/{id} - full job record, result fields null until terminal
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new("invalid job id format")),
            )
                .into_response();
        }
    };

    match state.store.fetch(job_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("job not found")),
        )
            .into_response(),
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to fetch job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("failed to fetch job")),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub workers: usize,
    pub pending: i64,
    pub running: i64,
}

/// GET /health - liveness plus queue depth
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.counts().await {
        Ok(counts) => Json(HealthResponse {
            ok: true,
            workers: state.config.worker_count,
            pending: counts.pending,
            running: counts.running,
        }),
        Err(e) => {
            error!(error = %e, "health check failed to reach store");
            Json(HealthResponse {
                ok: false,
                workers: state.config.worker_count,
                pending: 0,
                running: 0,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub jobs: Vec<JobSummary>,
    pub limit: i64,
    pub offset: i64,
}

/// GET /submissions - newest-first listing with optional status filter
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(10).clamp(1, MAX_LIST_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match JobStatus::from_str(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody::new(format!("unknown status filter: {raw}"))),
                )
                    .into_response();
            }
        },
    };

    match state.store.list(limit, offset, status).await {
        Ok(jobs) => (
            StatusCode::OK,
            Json(ListResponse {
                jobs,
                limit,
                offset,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to list jobs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("failed to list jobs")),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub id: &'static str,
    pub image: String,
    pub source_filename: String,
    pub compiled: bool,
    pub run_timeout_ms: u64,
    pub memory_limit_mib: u64,
}

/// GET /languages - the registry as seen by clients
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<LanguageInfo> = state
        .registry
        .list()
        .into_iter()
        .map(|recipe| LanguageInfo {
            id: recipe.language.as_str(),
            image: recipe.image.clone(),
            source_filename: recipe.source_filename.clone(),
            compiled: recipe.requires_compilation(),
            run_timeout_ms: recipe.run_timeout_ms,
            memory_limit_mib: recipe.memory_limit_mib,
        })
        .collect();

    Json(serde_json::json!({ "languages": languages }))
}
