use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::ticket::{IssueTicketRequest, TicketResponse},
    error::AppError,
    routes::valid_json::ValidJson,
    services::ticket_service,
    state::{SharedState, session::Actor},
};

/// Exchange the caller's identity for a short-lived, single-use stream ticket.
#[utoipa::path(
    post,
    path = "/live/tickets",
    tag = "sse",
    request_body = IssueTicketRequest,
    responses(
        (status = 200, description = "Ticket issued", body = TicketResponse),
        (status = 401, description = "Scope belongs to another account"),
    )
)]
pub async fn issue_ticket(
    State(state): State<SharedState>,
    actor: Actor,
    ValidJson(request): ValidJson<IssueTicketRequest>,
) -> Result<Json<TicketResponse>, AppError> {
    Ok(Json(ticket_service::issue_ticket(&state, &actor, &request)?))
}

/// Configure the ticket route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/live/tickets", post(issue_ticket))
}
