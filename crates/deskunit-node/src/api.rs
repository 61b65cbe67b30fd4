//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `presence` - Reported availability and the manual override
//! - `consultation` - The tracked request and the two desk buttons
//! - `bus` - Inbound bus delivery and the outbound message history
//! - `panel` - What the desk display currently shows
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

pub mod bus;
pub mod consultation;
pub mod error;
pub mod health;
pub mod openapi;
pub mod panel;
pub mod presence;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Acknowledgement for work handed to the control loop.
///
/// The loop applies queued work in order. Read the affected resource
/// afterwards to see the result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "queued": true,
    "kind": "button"
}))]
pub struct QueuedResponse {
    /// Always true.
    #[schema(example = true)]
    pub queued: bool,

    /// What was queued: `bus_message`, `button`, `override` or `reset`.
    #[schema(example = "button")]
    pub kind: String,
}

impl QueuedResponse {
    fn accepted(kind: &str) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                queued: true,
                kind: kind.to_string(),
            }),
        )
    }
}

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                     - Health check
/// /api
/// ├── /presence               - Reported availability
/// ├── /override               - Manual presence override
/// ├── /consultation           - Tracked consultation
/// ├── /commands/{button}      - Accept / reject button press
/// ├── /display                - Panel text
/// ├── /bus/messages           - Deliver an inbound bus message
/// ├── /bus/outbox             - Recently published messages
/// └── /openapi.json           - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .merge(presence::router())
                .merge(consultation::router())
                .merge(panel::router())
                .nest("/bus", bus::router()),
        )
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;

    use super::test_support::Harness;
    use super::*;

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let response = server.get("/api/unknown").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_route_serves_document() {
        let harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let response = server.get("/api/openapi.json").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert!(body["paths"]["/api/presence"].is_object());
    }
}
