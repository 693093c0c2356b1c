use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for pinquiz-back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::get_session,
        crate::routes::session::get_results,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SessionCreatedResponse,
            crate::dto::session::SessionSummary,
            crate::dto::session::FinalResultsResponse,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Live session lifecycle"),
        (name = "ws", description = "WebSocket operations for hosts and players"),
    )
)]
pub struct ApiDoc;
