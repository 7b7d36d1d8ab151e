use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the live scoring backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::start_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::list_events,
        crate::routes::sessions::submit_mutation,
        crate::routes::sessions::advance_position,
        crate::routes::sessions::pause_session,
        crate::routes::sessions::resume_session,
        crate::routes::sessions::finalize_session,
        crate::routes::sessions::game_status,
        crate::routes::tickets::issue_ticket,
        crate::routes::sse::live_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::live::StartSessionRequest,
            crate::dto::live::AdvancePositionRequest,
            crate::dto::live::ScoreMutationRequest,
            crate::dto::live::MutationType,
            crate::dto::live::PlayDto,
            crate::dto::live::AuditDto,
            crate::dto::live::PositionDto,
            crate::dto::live::HalfDto,
            crate::dto::live::ScorelineDto,
            crate::dto::live::BasesDto,
            crate::dto::live::MutationResponse,
            crate::dto::live::FoldedStateView,
            crate::dto::live::LivePlayView,
            crate::dto::live::SessionView,
            crate::dto::live::ScoreEventView,
            crate::dto::live::FinalRecordView,
            crate::dto::live::SessionStatusProbe,
            crate::dto::ticket::ScopeKind,
            crate::dto::ticket::ScopeDto,
            crate::dto::ticket::IssueTicketRequest,
            crate::dto::ticket::TicketResponse,
            crate::dto::sse::ConnectedEvent,
            crate::dto::sse::NoSessionEvent,
            crate::dto::sse::ScoreEventPayload,
            crate::dto::sse::SessionStatusEvent,
            crate::dto::sse::PositionChangedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Live session lifecycle"),
        (name = "scoring", description = "Score mutation ingestion"),
        (name = "sse", description = "Stream tickets and server-sent event streams"),
    )
)]
pub struct ApiDoc;
