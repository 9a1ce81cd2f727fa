// HTTP route handlers for the grading API

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use dojo_common::types::{RunRequest, UserId, ValidateRequest};
use dojo_grader::selection::pick_random_problem;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomProblemQuery {
    pub user_id: UserId,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Label value for metrics; arbitrary request tags must not become series
fn language_label(state: &AppState, language: &str) -> String {
    state
        .validator
        .runner()
        .languages()
        .get(language)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "unsupported".to_string())
}

/// POST /validate - Grade a submission against a problem's reference
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Response {
    let start = Instant::now();
    let language = language_label(&state, &payload.language);

    // Run on its own task so a panic in grading surfaces as a JoinError
    let validator = state.validator.clone();
    let task = tokio::spawn(async move { validator.validate(&payload).await });

    match task.await {
        Ok(result) => {
            state.metrics.record_validation(
                &language,
                result.is_correct,
                start.elapsed().as_secs_f64(),
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Validation task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /run - Execute code once, no grading
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    let language = language_label(&state, &payload.language);
    let validator = state.validator.clone();
    let task = tokio::spawn(async move { validator.run(&payload.code, &payload.language).await });

    match task.await {
        Ok(result) => {
            state
                .metrics
                .record_run(&language, result.success, result.timed_out);
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Run task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /problems/random?userId=N - Pick an unsolved problem on the user's level
pub async fn random_problem(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RandomProblemQuery>,
) -> Response {
    let mut rng = StdRng::from_entropy();
    match pick_random_problem(&*state.store, query.user_id, &mut rng).await {
        Ok(Some(problem)) => {
            info!(user_id = query.user_id, problem_id = problem.id, "Random problem picked");
            (StatusCode::OK, Json(problem)).into_response()
        }
        Ok(None) => {
            warn!(user_id = query.user_id, "No problem available");
            error_response(
                StatusCode::NOT_FOUND,
                format!("No problem available for user {}", query.user_id),
            )
        }
        Err(e) => {
            error!(user_id = query.user_id, error = %e, "Random problem lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /languages - Supported language tags
pub async fn languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "languages": state.validator.runner().languages().list_languages(),
        "isolation": state.validator.runner().isolation().name(),
    }))
}

/// GET /metrics - Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
