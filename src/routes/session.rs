use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::session::{CreateSessionRequest, FinalResultsResponse, SessionCreatedResponse, SessionSummary},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes handling the session lifecycle over REST.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{pin}", get(get_session))
        .route("/sessions/{pin}/results", get(get_results))
}

/// Extract the bearer key of the `Authorization` header, if any.
fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Open a new live session for a verified host.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionCreatedResponse),
        (status = 401, description = "Missing or invalid host key"),
        (status = 503, description = "No free PIN or storage unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionCreatedResponse>, AppError> {
    if !state.config().accepts_host_key(bearer_key(&headers)) {
        return Err(AppError::Unauthorized("invalid host key".into()));
    }

    let response = session_service::create_session(&state, payload).await?;
    Ok(Json(response))
}

/// Public summary of a live session.
#[utoipa::path(
    get,
    path = "/sessions/{pin}",
    tag = "session",
    params(("pin" = String, Path, description = "PIN of the session")),
    responses(
        (status = 200, description = "Session summary", body = SessionSummary),
        (status = 404, description = "Unknown or expired PIN")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(pin): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    let summary = session_service::session_summary(&state, &pin).await?;
    Ok(Json(summary))
}

/// Durable final results of a finished session.
#[utoipa::path(
    get,
    path = "/sessions/{pin}/results",
    tag = "session",
    params(("pin" = String, Path, description = "PIN the session was played under")),
    responses(
        (status = 200, description = "Final results", body = FinalResultsResponse),
        (status = 404, description = "No results recorded for this PIN")
    )
)]
pub async fn get_results(
    State(state): State<SharedState>,
    Path(pin): Path<String>,
) -> Result<Json<FinalResultsResponse>, AppError> {
    let results = session_service::final_results(&state, &pin).await?;
    Ok(Json(results))
}
