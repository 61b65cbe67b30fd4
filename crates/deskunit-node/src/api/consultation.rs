//! Consultation API endpoints.
//!
//! A unit tracks at most one consultation request at a time. The two
//! physical buttons are mirrored here so a unit without buttons can still
//! be operated.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use deskunit_core::{ButtonCommand, ConsultationRequest, ConsultationStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::QueuedResponse;
use crate::api::error::ApiResult;
use crate::gateway::Inbound;
use crate::state::SharedState;

/// Creates the consultation router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/consultation", get(get_consultation).delete(reset_consultation))
        .route("/commands/{button}", post(press_button))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// The tracked consultation request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 42,
    "student_label": "Maria Santos",
    "message": "Question about the midterm",
    "status": "pending"
}))]
pub struct ConsultationView {
    /// Request id assigned by the central system.
    #[schema(example = 42, minimum = 1)]
    pub id: u64,

    /// Student display label.
    #[schema(example = "Maria Santos", max_length = 48)]
    pub student_label: String,

    /// Free text from the student.
    #[schema(example = "Question about the midterm", max_length = 256)]
    pub message: String,

    /// Lifecycle status.
    pub status: ConsultationStatus,
}

impl From<&ConsultationRequest> for ConsultationView {
    fn from(request: &ConsultationRequest) -> Self {
        Self {
            id: request.id,
            student_label: request.student_label.to_string(),
            message: request.message.to_string(),
            status: request.status,
        }
    }
}

/// Current consultation slot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "active": true,
    "consultation": {
        "id": 42,
        "student_label": "Maria Santos",
        "message": "Question about the midterm",
        "status": "pending"
    }
}))]
pub struct ConsultationResponse {
    /// Whether a request is being tracked.
    #[schema(example = true)]
    pub active: bool,

    /// The tracked request.
    #[schema(nullable)]
    pub consultation: Option<ConsultationView>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the tracked consultation.
#[utoipa::path(
    get,
    path = "/api/consultation",
    tag = "consultation",
    operation_id = "getConsultation",
    summary = "Get the tracked consultation request",
    description = "Returns the single request this unit is tracking, or \
        `active: false` when the slot is empty.",
    responses(
        (status = 200, description = "Current consultation slot", body = ConsultationResponse)
    )
)]
pub async fn get_consultation(State(state): State<SharedState>) -> Json<ConsultationResponse> {
    let consultation = state.snapshot().consultation.as_ref().map(ConsultationView::from);

    Json(ConsultationResponse {
        active: consultation.is_some(),
        consultation,
    })
}

/// Clear the consultation slot.
#[utoipa::path(
    delete,
    path = "/api/consultation",
    tag = "consultation",
    operation_id = "resetConsultation",
    summary = "Clear the tracked consultation request",
    description = "Queues a reset of the consultation slot. Nothing is published \
        to the bus, so use this to recover a unit whose request was closed \
        elsewhere without the unit hearing about it.",
    responses(
        (status = 202, description = "Reset queued", body = QueuedResponse),
        (status = 503, description = "Control loop unavailable", body = super::ErrorResponse)
    )
)]
pub async fn reset_consultation(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<QueuedResponse>)> {
    state.submit(Inbound::Reset)?;
    Ok(QueuedResponse::accepted("reset"))
}

/// Press a desk button.
#[utoipa::path(
    post,
    path = "/api/commands/{button}",
    tag = "consultation",
    operation_id = "pressButton",
    summary = "Press the accept or reject button",
    description = "Queues a button press. `accept` accepts a pending request, starts \
        an accepted one and completes a started one. `reject` rejects a pending \
        request and cancels an accepted or started one. Presses that do not apply \
        to the current status change nothing.",
    params(
        ("button" = ButtonCommand, Path, description = "Which button was pressed")
    ),
    responses(
        (status = 202, description = "Press queued", body = QueuedResponse),
        (status = 503, description = "Control loop unavailable", body = super::ErrorResponse)
    )
)]
pub async fn press_button(
    State(state): State<SharedState>,
    Path(button): Path<ButtonCommand>,
) -> ApiResult<(StatusCode, Json<QueuedResponse>)> {
    state.submit(Inbound::Button(button))?;
    Ok(QueuedResponse::accepted("button"))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;

    use super::*;
    use crate::api::create_router;
    use crate::api::test_support::Harness;

    fn request_body(id: u64) -> Vec<u8> {
        format!(r#"{{"id":{id},"studentLabel":"Maria Santos","message":"Midterm"}}"#).into_bytes()
    }

    #[tokio::test]
    async fn test_empty_slot() {
        let harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let body: ConsultationResponse = server.get("/api/consultation").await.json();
        assert!(!body.active);
        assert!(body.consultation.is_none());
    }

    #[tokio::test]
    async fn test_tracked_request_is_visible() {
        let mut harness = Harness::new();
        harness.unit.set_manual_override(Some(true));
        let topic = harness.unit.topics().request.clone();
        harness.unit.handle_bus_message(&topic, &request_body(42));
        harness.sync();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let body: ConsultationResponse = server.get("/api/consultation").await.json();
        assert!(body.active);
        let view = body.consultation.unwrap();
        assert_eq!(view.id, 42);
        assert_eq!(view.student_label, "Maria Santos");
        assert_eq!(view.status, ConsultationStatus::Pending);
    }

    #[tokio::test]
    async fn test_button_press_is_queued() {
        let mut harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        server
            .post("/api/commands/accept")
            .await
            .assert_status(StatusCode::ACCEPTED);
        server
            .post("/api/commands/reject")
            .await
            .assert_status(StatusCode::ACCEPTED);

        assert_eq!(
            harness.inbox.try_recv().unwrap(),
            Inbound::Button(ButtonCommand::Accept)
        );
        assert_eq!(
            harness.inbox.try_recv().unwrap(),
            Inbound::Button(ButtonCommand::Reject)
        );
    }

    #[tokio::test]
    async fn test_reset_is_queued() {
        let mut harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let response = server.delete("/api/consultation").await;
        response.assert_status(StatusCode::ACCEPTED);
        let body: QueuedResponse = response.json();
        assert_eq!(body.kind, "reset");
        assert_eq!(harness.inbox.try_recv().unwrap(), Inbound::Reset);
    }

    #[tokio::test]
    async fn test_reset_clears_tracked_request() {
        let mut harness = Harness::new();
        harness.unit.set_manual_override(Some(true));
        let topic = harness.unit.topics().request.clone();
        harness.unit.handle_bus_message(&topic, &request_body(42));
        harness.sync();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        server
            .delete("/api/consultation")
            .await
            .assert_status(StatusCode::ACCEPTED);
        assert_eq!(harness.inbox.try_recv().unwrap(), Inbound::Reset);
        harness.unit.reset_consultation();
        harness.sync();

        let body: ConsultationResponse = server.get("/api/consultation").await.json();
        assert!(!body.active);
    }

    #[tokio::test]
    async fn test_unknown_button_is_rejected() {
        let harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let response = server.post("/api/commands/snooze").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_press_after_loop_stopped() {
        let Harness { state, inbox, .. } = Harness::new();
        drop(inbox);
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.post("/api/commands/accept").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "loop_stopped");
    }
}
