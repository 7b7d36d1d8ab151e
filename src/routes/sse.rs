use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{
    dto::ticket::{ScopeKind, StreamQuery, parse_address},
    error::{AppError, ServiceError},
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/live/stream/{kind}/{id}",
    tag = "sse",
    params(
        ("kind" = ScopeKind, Path, description = "`session`, `game` or `account`"),
        ("id" = String, Path, description = "Session id, game or round id, or account id"),
        StreamQuery,
    ),
    responses(
        (status = 200, description = "Live event stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Ticket rejected"),
    )
)]
/// Open a live stream for one scope. The ticket is consumed by this call.
pub async fn live_stream(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(ScopeKind, String)>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let address =
        parse_address(kind, &id).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let subscription = sse_service::open_stream(&state, address, &query.ticket).await?;
    Ok(sse_service::to_sse_stream(state, subscription))
}

/// Configure the SSE endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/live/stream/{kind}/{id}", get(live_stream))
}
