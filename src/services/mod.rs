/// OpenAPI documentation generation.
pub mod documentation;
/// Per-session engine task owning all state mutation.
pub mod engine;
/// Health check service.
pub mod health_service;
/// Unique session PIN allocation.
pub mod pin_allocator;
/// Final results assembly and persistence.
pub mod results;
/// Pure score computation.
pub mod scoring;
/// Session lifecycle operations.
pub mod session_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
