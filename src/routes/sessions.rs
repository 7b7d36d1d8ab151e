use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::live::{
        AdvancePositionRequest, FinalRecordView, MutationResponse, ScoreEventView,
        ScoreMutationRequest, SessionStatusProbe, SessionView, StartSessionRequest,
    },
    error::{AppError, ServiceError},
    routes::valid_json::ValidJson,
    services::{ingest_service, session_service},
    state::{SharedState, score::MutationInput, session::Actor},
};

/// Start scoring a game or round.
#[utoipa::path(
    post,
    path = "/live/sessions",
    tag = "sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = SessionView),
        (status = 409, description = "A live session already exists for the game or round"),
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    actor: Actor,
    ValidJson(request): ValidJson<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let view = session_service::start_session(&state, &actor, request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Current session view with its folded state.
#[utoipa::path(
    get,
    path = "/live/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown session"),
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::get_session(&state, id, &actor).await?))
}

/// Ordered event log of a session.
#[utoipa::path(
    get,
    path = "/live/sessions/{id}/events",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Event log", body = [ScoreEventView]))
)]
pub async fn list_events(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ScoreEventView>>, AppError> {
    Ok(Json(session_service::list_events(&state, id, &actor).await?))
}

/// Submit a create, update or delete.
///
/// Retries with the same `clientEventId` return the original result.
#[utoipa::path(
    post,
    path = "/live/sessions/{id}/mutations",
    tag = "scoring",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = ScoreMutationRequest,
    responses(
        (status = 201, description = "Play created", body = MutationResponse),
        (status = 200, description = "Play updated or deleted", body = MutationResponse),
        (status = 409, description = "Stale sequence or session not accepting mutations"),
    )
)]
pub async fn submit_mutation(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<ScoreMutationRequest>,
) -> Result<(StatusCode, Json<MutationResponse>), AppError> {
    let input = MutationInput::try_from(request).map_err(ServiceError::from)?;
    let submission = ingest_service::submit_mutation(&state, id, &actor, input).await?;
    let status = if submission.is_create() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(MutationResponse::from(&submission.outcome))))
}

/// Move the inning or hole pointer.
#[utoipa::path(
    post,
    path = "/live/sessions/{id}/position",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = AdvancePositionRequest,
    responses((status = 200, description = "Position moved", body = SessionView))
)]
pub async fn advance_position(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    ValidJson(request): ValidJson<AdvancePositionRequest>,
) -> Result<Json<SessionView>, AppError> {
    let view = session_service::advance_position(&state, id, &actor, request.target()).await?;
    Ok(Json(view))
}

/// Pause an active session.
#[utoipa::path(
    post,
    path = "/live/sessions/{id}/pause",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Session paused", body = SessionView))
)]
pub async fn pause_session(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::pause(&state, id, &actor).await?))
}

/// Resume a paused session.
#[utoipa::path(
    post,
    path = "/live/sessions/{id}/resume",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Session resumed", body = SessionView))
)]
pub async fn resume_session(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::resume(&state, id, &actor).await?))
}

/// Fold the session into its permanent record.
#[utoipa::path(
    post,
    path = "/live/sessions/{id}/finalize",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Permanent record", body = FinalRecordView),
        (status = 503, description = "Storage unavailable; finalize will be retried"),
    )
)]
pub async fn finalize_session(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<FinalRecordView>, AppError> {
    Ok(Json(session_service::finalize(&state, id, &actor).await?))
}

/// Whether a game or round has a live session worth streaming.
#[utoipa::path(
    get,
    path = "/live/games/{game_or_round_id}/status",
    tag = "sessions",
    params(("game_or_round_id" = String, Path, description = "Game or round identifier")),
    responses((status = 200, description = "Status probe", body = SessionStatusProbe))
)]
pub async fn game_status(
    State(state): State<SharedState>,
    actor: Actor,
    Path(game_or_round_id): Path<String>,
) -> Json<SessionStatusProbe> {
    Json(session_service::status_probe(&state, &game_or_round_id, &actor).await)
}

/// Configure the session and scoring routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/live/sessions", post(start_session))
        .route("/live/sessions/{id}", get(get_session))
        .route("/live/sessions/{id}/events", get(list_events))
        .route("/live/sessions/{id}/mutations", post(submit_mutation))
        .route("/live/sessions/{id}/position", post(advance_position))
        .route("/live/sessions/{id}/pause", post(pause_session))
        .route("/live/sessions/{id}/resume", post(resume_session))
        .route("/live/sessions/{id}/finalize", post(finalize_session))
        .route("/live/games/{game_or_round_id}/status", get(game_status))
}
